pub mod auth;
pub mod chat;
pub mod sessions;

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build the full API router: the turn endpoint plus the auxiliary session
/// endpoints the frontend needs. Identity is resolved per-request from the
/// bearer token (see `auth::resolve_user_id`) rather than gated by a single
/// shared-secret middleware layer.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/turns/stream", post(chat::turns_stream))
        .route("/v1/turns", post(chat::turns))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:session_id", delete(sessions::delete_session))
        .route("/v1/sessions/:session_id/messages", get(sessions::get_messages))
        .route(
            "/v1/sessions/:session_id/messages/:message_id/rating",
            put(sessions::rate_message),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
