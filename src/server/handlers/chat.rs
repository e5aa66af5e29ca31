use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let turn = state.bot.ask(&payload.question).await?;
    Ok(Json(turn))
}

/// SSE: one `sources` event, then `token` events, then `done` (or `error`).
pub async fn ask_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let (sources, rx) = state.bot.ask_streaming(&payload.question).await?;

    let head = Event::default()
        .event("sources")
        .json_data(&sources)
        .map_err(ApiError::internal)?;

    let tokens = stream::unfold((rx, false), |(mut rx, finished)| async move {
        if finished {
            return None;
        }
        let (event, finished) = match rx.recv().await {
            Some(Ok(text)) => (json_event("token", json!({ "content": text })), false),
            Some(Err(err)) => (json_event("error", json!({ "error": err.to_string() })), true),
            None => (Event::default().event("done").data("[DONE]"), true),
        };
        Some((Ok::<Event, Infallible>(event), (rx, finished)))
    });

    let events = stream::once(async move { Ok::<Event, Infallible>(head) }).chain(tokens);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Serialized JSON has no raw newlines, so it always fits one `data:` line.
fn json_event(name: &str, data: serde_json::Value) -> Event {
    Event::default().event(name).data(data.to_string())
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    Ok(Json(state.bot.history().await))
}

pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    state.bot.clear_history().await;
    Ok(Json(json!({ "status": "success" })))
}
