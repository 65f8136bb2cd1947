//! The Turn Entry Point — the primary interface for running a turn.
//!
//! - `POST /v1/turns/stream` — SSE streaming: the core contract, one SSE
//!   event per [`TurnEvent`].
//! - `POST /v1/turns`        — non-streaming: a thin wrapper that drains
//!   the same event stream into one JSON response.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;

use crate::api::auth::resolve_user_id;
use crate::runtime::{run_turn, TurnEvent, TurnInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

fn event_name(event: &TurnEvent) -> &'static str {
    match event {
        TurnEvent::Session { .. } => "session",
        TurnEvent::Text { .. } => "text",
        TurnEvent::Widget { .. } => "widget",
        TurnEvent::Tool { .. } => "tool",
        TurnEvent::Progress { .. } => "progress",
        TurnEvent::Done { .. } => "done",
    }
}

/// Shared pre-flight: resolve the caller's identity and try to claim the
/// session lock, returning an HTTP error response for either failure.
fn begin_turn(
    state: &AppState,
    headers: &HeaderMap,
    body: TurnRequest,
) -> Result<(TurnInput, tokio::sync::OwnedSemaphorePermit), axum::response::Response> {
    let user_id = resolve_user_id(headers).map_err(|e| {
        (
            axum::http::StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response()
    })?;

    let lock_key = body
        .session_id
        .clone()
        .unwrap_or_else(|| format!("new:{user_id}"));
    let permit = state.session_locks.try_acquire(&lock_key).ok_or_else(|| {
        (
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "session is busy — a turn is already in progress"
            })),
        )
            .into_response()
    })?;

    Ok((
        TurnInput {
            user_id,
            session_id: body.session_id,
            message: body.message,
        },
        permit,
    ))
}

pub async fn turns_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TurnRequest>,
) -> impl IntoResponse {
    let (input, permit) = match begin_turn(&state, &headers, body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let rx = run_turn(state, input, permit);
    let stream = sse_stream(rx);

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

pub async fn turns(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TurnRequest>,
) -> impl IntoResponse {
    let (input, permit) = match begin_turn(&state, &headers, body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut rx = run_turn(state, input, permit);

    let mut session_id = None;
    let mut text = String::new();
    let mut widgets = Vec::new();
    let mut tools = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Session { session_id: sid } => session_id = Some(sid),
            TurnEvent::Text { chunk } => text.push_str(&chunk),
            TurnEvent::Widget { kind, data, compact } => {
                widgets.push(serde_json::json!({ "type": kind, "data": data, "compact": compact }));
            }
            TurnEvent::Tool {
                name,
                status,
                args,
                fuse_triggered,
            } => {
                tools.push(serde_json::json!({
                    "name": name,
                    "status": status,
                    "args": args,
                    "fuse_triggered": fuse_triggered,
                }));
            }
            TurnEvent::Progress { .. } => { /* non-streaming callers don't need progress ticks */ }
            TurnEvent::Done { session_id: sid } => session_id = Some(sid),
        }
    }

    Json(serde_json::json!({
        "session_id": session_id,
        "text": text,
        "widgets": widgets,
        "tools": tools,
    }))
    .into_response()
}

fn sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let name = event_name(&event);
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(name).data(data));
        }
    }
}
