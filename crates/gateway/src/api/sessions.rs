//! Auxiliary session endpoints used by the frontend. Not core orchestration
//! logic — thin pass-throughs to the Memory Store.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::auth::resolve_user_id;
use crate::state::AppState;

fn unauthorized(e: impl std::fmt::Display) -> axum::response::Response {
    (
        axum::http::StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

fn forbidden() -> axum::response::Response {
    (
        axum::http::StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "error": "session does not belong to this user" })),
    )
        .into_response()
}

/// Resolve the caller's identity and confirm they own `session_id`. A
/// session with no recorded owner (never created, or already deleted) is
/// treated as not-found rather than leaking existence via a 403.
fn authorize_session(
    state: &AppState,
    headers: &HeaderMap,
    session_id: &str,
) -> Result<(), axum::response::Response> {
    let user_id = resolve_user_id(headers).map_err(unauthorized)?;
    match state.memory.session_owner(session_id) {
        Some(owner) if owner == user_id => Ok(()),
        Some(_) => Err(forbidden()),
        None => Ok(()),
    }
}

pub async fn list_sessions(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user_id = match resolve_user_id(&headers) {
        Ok(id) => id,
        Err(e) => return unauthorized(e),
    };
    Json(state.memory.list_sessions(&user_id)).into_response()
}

pub async fn get_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = authorize_session(&state, &headers, &session_id) {
        return resp;
    }
    Json(state.memory.read_messages(&session_id)).into_response()
}

pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = authorize_session(&state, &headers, &session_id) {
        return resp;
    }
    match state.memory.delete_session(&session_id) {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RatingBody {
    pub rating: i8,
}

pub async fn rate_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((session_id, message_id)): Path<(String, String)>,
    Json(body): Json<RatingBody>,
) -> impl IntoResponse {
    if let Err(resp) = authorize_session(&state, &headers, &session_id) {
        return resp;
    }
    match state.memory.rate_message(&session_id, &message_id, body.rating) {
        Ok(true) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "message not found in session" })),
        )
            .into_response(),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
