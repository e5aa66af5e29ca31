use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{check_dimension, rank_chunks, ScoredChunk, StoreStats, VectorStore};
use crate::core::errors::ApiError;
use crate::ingest::Chunk;

#[derive(Default)]
struct Inner {
    /// Insertion order; upserts replace in place.
    entries: Vec<(Chunk, Vec<f32>)>,
    positions: HashMap<String, usize>,
    sources: HashMap<String, String>,
    dimension: Option<usize>,
}

impl Inner {
    fn reindex_positions(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, (chunk, _))| (chunk.id.clone(), idx))
            .collect();
    }
}

#[derive(Default)]
pub struct MemoryVectorStore {
    inner: RwLock<Inner>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_ready(&self, dimension: usize) -> Result<(), ApiError> {
        let mut inner = self.inner.write().await;
        if inner.entries.is_empty() {
            inner.dimension = Some(dimension);
            return Ok(());
        }
        check_dimension(inner.dimension, dimension)
    }

    async fn upsert(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<usize, ApiError> {
        let mut inner = self.inner.write().await;
        let written = items.len();

        for (chunk, embedding) in items {
            check_dimension(inner.dimension, embedding.len())?;
            if inner.dimension.is_none() {
                inner.dimension = Some(embedding.len());
            }

            match inner.positions.get(&chunk.id).copied() {
                Some(idx) => inner.entries[idx] = (chunk, embedding),
                None => {
                    let idx = inner.entries.len();
                    inner.positions.insert(chunk.id.clone(), idx);
                    inner.entries.push((chunk, embedding));
                }
            }
        }

        Ok(written)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<ScoredChunk>, ApiError> {
        let inner = self.inner.read().await;
        Ok(rank_chunks(
            query,
            inner
                .entries
                .iter()
                .map(|(chunk, embedding)| (chunk, embedding.as_slice())),
            k,
            min_score,
        ))
    }

    async fn count(&self) -> Result<usize, ApiError> {
        Ok(self.inner.read().await.entries.len())
    }

    async fn stats(&self) -> Result<StoreStats, ApiError> {
        let inner = self.inner.read().await;
        let mut namespaces = BTreeMap::new();
        namespaces.insert("default".to_string(), inner.entries.len());
        Ok(StoreStats {
            backend: self.name().to_string(),
            total_vectors: inner.entries.len(),
            dimension: inner.dimension,
            namespaces,
        })
    }

    async fn sample(&self, limit: usize) -> Result<Vec<(Chunk, Vec<f32>)>, ApiError> {
        let inner = self.inner.read().await;
        Ok(inner.entries.iter().take(limit).cloned().collect())
    }

    async fn delete_source(&self, source: &str) -> Result<usize, ApiError> {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|(chunk, _)| chunk.source != source);
        inner.reindex_positions();
        Ok(before - inner.entries.len())
    }

    async fn source_hash(&self, source: &str) -> Result<Option<String>, ApiError> {
        Ok(self.inner.read().await.sources.get(source).cloned())
    }

    async fn record_source_hash(&self, source: &str, hash: &str) -> Result<(), ApiError> {
        self.inner
            .write()
            .await
            .sources
            .insert(source.to_string(), hash.to_string());
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<String>, ApiError> {
        let mut sources: Vec<String> = self.inner.read().await.sources.keys().cloned().collect();
        sources.sort();
        Ok(sources)
    }

    async fn forget_source(&self, source: &str) -> Result<(), ApiError> {
        self.inner.write().await.sources.remove(source);
        Ok(())
    }

    async fn reset(&self) -> Result<(), ApiError> {
        *self.inner.write().await = Inner::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::chunk;

    #[tokio::test]
    async fn upsert_replaces_by_id_and_keeps_order() {
        let store = MemoryVectorStore::new();
        store
            .upsert(vec![
                (chunk("a", "s1", "first"), vec![1.0, 0.0]),
                (chunk("b", "s1", "second"), vec![1.0, 0.0]),
            ])
            .await
            .unwrap();
        store
            .upsert(vec![(chunk("a", "s1", "first v2"), vec![1.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        let hits = store.search(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits[0].chunk.text, "first v2");
        assert_eq!(hits[1].chunk.id, "b");
    }

    #[tokio::test]
    async fn rejects_mismatched_dimensions() {
        let store = MemoryVectorStore::new();
        store.ensure_ready(2).await.unwrap();

        let err = store
            .upsert(vec![(chunk("a", "s", "t"), vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn delete_source_and_reset() {
        let store = MemoryVectorStore::new();
        store
            .upsert(vec![
                (chunk("a", "s1", "x"), vec![1.0]),
                (chunk("b", "s2", "y"), vec![1.0]),
            ])
            .await
            .unwrap();
        store.record_source_hash("s1", "h1").await.unwrap();

        assert_eq!(store.delete_source("s1").await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.source_hash("s1").await.unwrap().as_deref(), Some("h1"));
        assert_eq!(store.list_sources().await.unwrap(), vec!["s1"]);
        store.forget_source("s1").await.unwrap();
        assert!(store.list_sources().await.unwrap().is_empty());
        store.record_source_hash("s1", "h1").await.unwrap();

        // Replacing after a delete must hit the right slot.
        store
            .upsert(vec![(chunk("b", "s2", "y2"), vec![1.0])])
            .await
            .unwrap();
        assert_eq!(store.sample(10).await.unwrap()[0].0.text, "y2");

        store.reset().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.source_hash("s1").await.unwrap().is_none());
        assert!(store.stats().await.unwrap().dimension.is_none());
    }
}
