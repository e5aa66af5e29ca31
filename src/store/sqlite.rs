//! SQLite-backed vector store.
//!
//! Chunks and their embeddings live in one database file; search loads every
//! embedding and ranks by brute-force cosine similarity.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

use super::{check_dimension, rank_chunks, ScoredChunk, StoreStats, VectorStore};
use crate::core::errors::ApiError;
use crate::ingest::{Chunk, DocumentKind};
use crate::vector_math::{decode_embedding, encode_embedding};

const META_DIMENSION: &str = "dimension";
const META_EMBEDDING_MODEL: &str = "embedding_model";

pub struct SqliteVectorStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteVectorStore {
    pub async fn with_path(db_path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(ApiError::internal)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool, db_path };
        store.init_schema().await?;
        tracing::debug!("Opened vector store at {}", store.db_path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                source TEXT NOT NULL,
                kind TEXT NOT NULL,
                page INTEGER,
                chunk_index INTEGER NOT NULL DEFAULT 0,
                start_offset INTEGER NOT NULL DEFAULT 0,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sources (
                source TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn meta(&self, key: &str) -> Result<Option<String>, ApiError> {
        sqlx::query_scalar("SELECT value FROM store_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT OR REPLACE INTO store_meta (key, value, updated_at)
             VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    async fn dimension(&self) -> Result<Option<usize>, ApiError> {
        Ok(self
            .meta(META_DIMENSION)
            .await?
            .and_then(|value| value.parse::<usize>().ok()))
    }

    /// Records which embedding model produced the stored vectors. A different
    /// model clears the store; returns `true` when that happened.
    pub async fn sync_embedding_model(&self, model: &str) -> Result<bool, ApiError> {
        let previous = self.meta(META_EMBEDDING_MODEL).await?;
        let changed = matches!(previous.as_deref(), Some(prev) if prev != model);

        if changed && self.count().await? > 0 {
            tracing::warn!(
                "Embedding model changed from {:?} to {}; clearing stored vectors",
                previous,
                model
            );
            self.reset().await?;
            self.set_meta(META_EMBEDDING_MODEL, model).await?;
            return Ok(true);
        }

        self.set_meta(META_EMBEDDING_MODEL, model).await?;
        Ok(false)
    }

    fn row_to_chunk(row: &SqliteRow) -> Chunk {
        let kind: String = row.get("kind");
        let page: Option<i64> = row.get("page");
        let chunk_index: i64 = row.get("chunk_index");
        let start_offset: i64 = row.get("start_offset");

        Chunk {
            id: row.get("id"),
            text: row.get("text"),
            source: row.get("source"),
            kind: DocumentKind::parse(&kind).unwrap_or(DocumentKind::Txt),
            page: page.map(|p| p as u32),
            chunk_index: chunk_index as usize,
            start_offset: start_offset as usize,
        }
    }

    async fn all_rows(&self, limit: Option<usize>) -> Result<Vec<SqliteRow>, ApiError> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        sqlx::query(
            "SELECT id, text, source, kind, page, chunk_index, start_offset, embedding
             FROM chunks
             ORDER BY rowid
             LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_ready(&self, dimension: usize) -> Result<(), ApiError> {
        let current = self.dimension().await?;
        if current.is_some() && self.count().await? > 0 {
            return check_dimension(current, dimension);
        }
        self.set_meta(META_DIMENSION, &dimension.to_string()).await
    }

    async fn upsert(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<usize, ApiError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut dimension = self.dimension().await?;
        for (_, embedding) in &items {
            check_dimension(dimension, embedding.len())?;
            dimension.get_or_insert(embedding.len());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (chunk, embedding) in &items {
            // ON CONFLICT keeps the rowid, so replaced chunks keep their order.
            sqlx::query(
                "INSERT INTO chunks (id, text, source, kind, page, chunk_index, start_offset, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    source = excluded.source,
                    kind = excluded.kind,
                    page = excluded.page,
                    chunk_index = excluded.chunk_index,
                    start_offset = excluded.start_offset,
                    embedding = excluded.embedding",
            )
            .bind(&chunk.id)
            .bind(&chunk.text)
            .bind(&chunk.source)
            .bind(chunk.kind.as_str())
            .bind(chunk.page.map(i64::from))
            .bind(chunk.chunk_index as i64)
            .bind(chunk.start_offset as i64)
            .bind(encode_embedding(embedding))
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        if let Some(dimension) = dimension {
            sqlx::query(
                "INSERT OR REPLACE INTO store_meta (key, value, updated_at)
                 VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            )
            .bind(META_DIMENSION)
            .bind(dimension.to_string())
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(items.len())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<ScoredChunk>, ApiError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = self.all_rows(None).await?;
        let entries: Vec<(Chunk, Vec<f32>)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (Self::row_to_chunk(row), decode_embedding(&blob))
            })
            .collect();

        let hits = rank_chunks(
            query,
            entries
                .iter()
                .map(|(chunk, embedding)| (chunk, embedding.as_slice())),
            k,
            min_score,
        );
        tracing::debug!("sqlite search scanned {} chunks, returning {}", entries.len(), hits.len());
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(count as usize)
    }

    async fn stats(&self) -> Result<StoreStats, ApiError> {
        let total = self.count().await?;
        let mut namespaces = BTreeMap::new();
        namespaces.insert("default".to_string(), total);
        Ok(StoreStats {
            backend: self.name().to_string(),
            total_vectors: total,
            dimension: self.dimension().await?,
            namespaces,
        })
    }

    async fn sample(&self, limit: usize) -> Result<Vec<(Chunk, Vec<f32>)>, ApiError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self.all_rows(Some(limit)).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (Self::row_to_chunk(row), decode_embedding(&blob))
            })
            .collect())
    }

    async fn delete_source(&self, source: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM chunks WHERE source = ?1")
            .bind(source)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() as usize)
    }

    async fn source_hash(&self, source: &str) -> Result<Option<String>, ApiError> {
        sqlx::query_scalar("SELECT content_hash FROM sources WHERE source = ?1")
            .bind(source)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    async fn record_source_hash(&self, source: &str, hash: &str) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT OR REPLACE INTO sources (source, content_hash, updated_at)
             VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(source)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<String>, ApiError> {
        sqlx::query_scalar("SELECT source FROM sources ORDER BY source")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    async fn forget_source(&self, source: &str) -> Result<(), ApiError> {
        sqlx::query("DELETE FROM sources WHERE source = ?1")
            .bind(source)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        for statement in [
            "DELETE FROM chunks",
            "DELETE FROM sources",
            "DELETE FROM store_meta WHERE key = 'dimension'",
        ] {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
        }
        tx.commit().await.map_err(ApiError::internal)?;
        tracing::info!("Cleared vector store {}", self.db_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::chunk;

    async fn test_store(dir: &tempfile::TempDir) -> SqliteVectorStore {
        SqliteVectorStore::with_path(dir.path().join("vectorstore.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upsert_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store.ensure_ready(3).await.unwrap();

        let mut paged = chunk("pdf#0", "handbook.pdf", "Leave policy");
        paged.kind = DocumentKind::Pdf;
        paged.page = Some(4);
        paged.start_offset = 17;

        store
            .upsert(vec![
                (paged.clone(), vec![1.0, 0.0, 0.0]),
                (chunk("txt#0", "notes.txt", "Travel"), vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.1, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk, paged);
        assert!(hits[0].score > 0.99);

        let hits = store.search(&[1.0, 0.0, 0.0], 5, Some(0.5)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.search(&[1.0, 0.0, 0.0], 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replaced_chunks_keep_their_position() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store
            .upsert(vec![
                (chunk("a", "s", "one"), vec![1.0, 0.0]),
                (chunk("b", "s", "two"), vec![1.0, 0.0]),
            ])
            .await
            .unwrap();
        store
            .upsert(vec![(chunk("a", "s", "one v2"), vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 2, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(hits[0].chunk.text, "one v2");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dimension_is_pinned_once_vectors_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store
            .upsert(vec![(chunk("a", "s", "x"), vec![1.0, 0.0])])
            .await
            .unwrap();

        assert!(matches!(
            store.upsert(vec![(chunk("b", "s", "y"), vec![1.0])]).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(store.ensure_ready(1024).await, Err(ApiError::BadRequest(_))));
        assert_eq!(store.stats().await.unwrap().dimension, Some(2));
    }

    #[tokio::test]
    async fn source_hashes_deletes_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store
            .upsert(vec![
                (chunk("a", "one.txt", "x"), vec![1.0]),
                (chunk("b", "two.txt", "y"), vec![1.0]),
            ])
            .await
            .unwrap();
        store.record_source_hash("one.txt", "abc").await.unwrap();

        assert_eq!(store.source_hash("one.txt").await.unwrap().as_deref(), Some("abc"));
        assert!(store.source_hash("two.txt").await.unwrap().is_none());
        store.record_source_hash("two.txt", "def").await.unwrap();
        assert_eq!(store.list_sources().await.unwrap(), vec!["one.txt", "two.txt"]);
        store.forget_source("two.txt").await.unwrap();
        assert_eq!(store.list_sources().await.unwrap(), vec!["one.txt"]);
        assert_eq!(store.delete_source("one.txt").await.unwrap(), 1);
        assert_eq!(store.sample(10).await.unwrap().len(), 1);

        store.reset().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.source_hash("one.txt").await.unwrap().is_none());
        assert!(store.stats().await.unwrap().dimension.is_none());
    }

    #[tokio::test]
    async fn data_survives_reopen_and_model_change_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = test_store(&dir).await;
            assert!(!store.sync_embedding_model("model-a").await.unwrap());
            store
                .upsert(vec![(chunk("a", "s", "x"), vec![0.5, 0.5])])
                .await
                .unwrap();
        }

        let store = test_store(&dir).await;
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(!store.sync_embedding_model("model-a").await.unwrap());
        assert!(store.sync_embedding_model("model-b").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
