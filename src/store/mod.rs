//! Vector store backends.
//!
//! - `SqliteVectorStore`: single-file local store with brute-force cosine search
//! - `MemoryVectorStore`: process-local store for tests and throwaway sessions
//! - `PineconeStore`: remote serverless index over the Pinecone REST API

mod memory;
mod pinecone;
mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;
use crate::ingest::Chunk;
use crate::vector_math::{cosine_similarity, sort_by_score_desc};

pub use memory::MemoryVectorStore;
pub use pinecone::PineconeStore;
pub use sqlite::SqliteVectorStore;

/// A retrieved chunk and its similarity to the query (higher is closer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub backend: String,
    pub total_vectors: usize,
    pub dimension: Option<usize>,
    /// Vector count per namespace; local stores report a single entry.
    pub namespaces: BTreeMap<String, usize>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Creates tables or the remote index, and pins the vector dimension.
    async fn ensure_ready(&self, dimension: usize) -> Result<(), ApiError>;

    /// Inserts or replaces chunks by id. Returns the number written.
    async fn upsert(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<usize, ApiError>;

    /// Top `k` chunks by cosine similarity, best first.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<ScoredChunk>, ApiError>;

    async fn count(&self) -> Result<usize, ApiError>;

    async fn stats(&self) -> Result<StoreStats, ApiError>;

    /// Up to `limit` stored chunks with their vectors.
    async fn sample(&self, limit: usize) -> Result<Vec<(Chunk, Vec<f32>)>, ApiError>;

    /// Removes every chunk that came from `source`.
    async fn delete_source(&self, source: &str) -> Result<usize, ApiError>;

    async fn source_hash(&self, source: &str) -> Result<Option<String>, ApiError>;

    async fn record_source_hash(&self, source: &str, hash: &str) -> Result<(), ApiError>;

    /// Sources that have a recorded content hash, sorted.
    async fn list_sources(&self) -> Result<Vec<String>, ApiError>;

    /// Drops the recorded content hash of `source`.
    async fn forget_source(&self, source: &str) -> Result<(), ApiError>;

    /// Drops all chunks, source hashes and the pinned dimension.
    async fn reset(&self) -> Result<(), ApiError>;
}

pub(crate) fn check_dimension(expected: Option<usize>, actual: usize) -> Result<(), ApiError> {
    match expected {
        Some(expected) if expected != actual => Err(ApiError::BadRequest(format!(
            "Embedding dimension mismatch: store holds {}-dimensional vectors, got {}",
            expected, actual
        ))),
        _ => Ok(()),
    }
}

/// Brute-force ranking shared by the local stores. `items` must be in
/// insertion order so equal scores keep it.
pub(crate) fn rank_chunks<'a, I>(
    query: &[f32],
    items: I,
    k: usize,
    min_score: Option<f32>,
) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = (&'a Chunk, &'a [f32])>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<ScoredChunk> = items
        .into_iter()
        .map(|(chunk, embedding)| ScoredChunk {
            chunk: chunk.clone(),
            score: cosine_similarity(query, embedding),
        })
        .filter(|hit| min_score.map_or(true, |min| hit.score >= min))
        .collect();

    sort_by_score_desc(&mut scored, |hit| hit.score);
    scored.truncate(k);
    scored
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::ingest::{Chunk, DocumentKind};

    pub fn chunk(id: &str, source: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            source: source.to_string(),
            kind: DocumentKind::Txt,
            page: None,
            chunk_index: 0,
            start_offset: 0,
        }
    }
}
