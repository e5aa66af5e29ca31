use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub name: Option<String>,
}

/// Raw file bytes in the body; the file name (and so its type) comes from `?name=`.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    let name = query
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'name' is required".to_string()))?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("Request body is empty".to_string()));
    }

    tracing::info!("Upload received: {} ({} bytes)", name, body.len());
    let report = state.pipeline.ingest_bytes(&name, body.to_vec()).await?;
    Ok(Json(report))
}
