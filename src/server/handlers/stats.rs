use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::chat::preview;
use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;

const VALUES_PREVIEW: usize = 5;
const MAX_SAMPLE: usize = 100;

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let stats = state.bot.store().stats().await?;
    Ok(Json(json!({
        "backend": stats.backend,
        "total_vectors": stats.total_vectors,
        "dimension": stats.dimension,
        "namespaces": stats.namespaces,
        "history_len": state.bot.history_len().await,
        "chat_model": state.bot.model_name(),
        "top_k": state.bot.settings().top_k,
    })))
}

#[derive(Debug, Deserialize)]
pub struct VectorsQuery {
    pub limit: Option<usize>,
}

/// A few stored chunks with the head of their vectors.
pub async fn get_vectors(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<VectorsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let limit = query.limit.unwrap_or(VALUES_PREVIEW).min(MAX_SAMPLE);
    let sample = state.bot.store().sample(limit).await?;

    let vectors: Vec<_> = sample
        .iter()
        .map(|(chunk, values)| {
            json!({
                "id": chunk.id,
                "source": chunk.source,
                "page": chunk.page,
                "chunk_index": chunk.chunk_index,
                "text": preview(&chunk.text, 200),
                "dimension": values.len(),
                "values": values.iter().take(VALUES_PREVIEW).collect::<Vec<_>>(),
            })
        })
        .collect();

    Ok(Json(json!({ "count": vectors.len(), "vectors": vectors })))
}
