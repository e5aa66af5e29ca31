use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::document::{Chunk, Document};
use super::loader::{DocumentLoader, LoadFailure, LoaderConfig};
use super::splitter::RecursiveTextSplitter;
use crate::core::config::IngestSettings;
use crate::core::errors::ApiError;
use crate::embedding::{embed_in_batches, probe_dimension, Embedder};
use crate::store::VectorStore;

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    /// Documents loaded (PDF pages, text files, JSON items).
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    /// Sources whose content hash matched the stored one.
    pub skipped_unchanged: usize,
    /// Sources under the folder that were stored before but no longer load.
    pub removed_sources: usize,
    /// Files or JSON items that had nothing to embed.
    pub skipped: Vec<String>,
    pub failures: Vec<LoadFailure>,
    pub total_vectors: usize,
}

/// Load, split, embed and upsert. Sources are tracked by content hash, so
/// re-running over the same folder only touches files that changed.
pub struct IngestPipeline {
    loader: DocumentLoader,
    splitter: RecursiveTextSplitter,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl IngestPipeline {
    pub fn new(
        loader: DocumentLoader,
        splitter: RecursiveTextSplitter,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            loader,
            splitter,
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_settings(
        settings: &IngestSettings,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, ApiError> {
        let loader = DocumentLoader::new(LoaderConfig {
            max_json_files: settings.max_json_files,
        });
        let splitter = RecursiveTextSplitter::new(settings.chunk_size, settings.chunk_overlap)?;
        Ok(Self::new(
            loader,
            splitter,
            embedder,
            store,
            settings.embed_batch_size,
        ))
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn run(&self, folder: &Path) -> Result<IngestReport, ApiError> {
        tracing::info!("Ingesting documents from {}", folder.display());
        self.prepare_store().await?;

        let loader = self.loader.clone();
        let folder_buf: PathBuf = folder.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || loader.load_folder(&folder_buf))
            .await
            .map_err(ApiError::internal)??;

        let present: BTreeSet<&str> = loaded
            .documents
            .iter()
            .map(|doc| doc.metadata.source.as_str())
            .collect();
        let removed_sources = self.prune_missing_sources(folder, &present).await?;

        if loaded.documents.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "No documents found in {}",
                folder.display()
            )));
        }

        let mut report = IngestReport {
            documents: loaded.documents.len(),
            removed_sources,
            skipped: loaded.skipped,
            failures: loaded.failures,
            ..IngestReport::default()
        };

        self.index_documents(loaded.documents, &mut report).await?;
        report.total_vectors = self.store.count().await?;

        tracing::info!(
            "Ingest finished: {} documents, {} chunks embedded, {} unchanged sources, {} removed sources, {} failures, {} vectors stored",
            report.documents,
            report.embedded,
            report.skipped_unchanged,
            report.removed_sources,
            report.failures.len(),
            report.total_vectors
        );
        Ok(report)
    }

    /// Ingests a single uploaded file. Uploading the same bytes under the
    /// same name again is a no-op.
    pub async fn ingest_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<IngestReport, ApiError> {
        if bytes.is_empty() {
            return Err(ApiError::BadRequest(format!("Uploaded file '{}' is empty", name)));
        }
        self.prepare_store().await?;

        let loader = self.loader.clone();
        let upload_name = name.to_string();
        let documents = tokio::task::spawn_blocking(move || loader.load_bytes(&upload_name, &bytes))
            .await
            .map_err(ApiError::internal)??;

        if documents.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "No text could be extracted from '{}'",
                name
            )));
        }

        let mut report = IngestReport {
            documents: documents.len(),
            ..IngestReport::default()
        };
        self.index_documents(documents, &mut report).await?;
        report.total_vectors = self.store.count().await?;
        Ok(report)
    }

    async fn prepare_store(&self) -> Result<(), ApiError> {
        let dimension = probe_dimension(self.embedder.as_ref()).await?;
        self.store.ensure_ready(dimension).await
    }

    /// Removes the chunks and hash of every recorded source under `folder`
    /// that did not load this time.
    async fn prune_missing_sources(
        &self,
        folder: &Path,
        present: &BTreeSet<&str>,
    ) -> Result<usize, ApiError> {
        let mut removed = 0usize;
        for source in self.store.list_sources().await? {
            if present.contains(source.as_str()) || !Path::new(&source).starts_with(folder) {
                continue;
            }
            let chunks = self.store.delete_source(&source).await?;
            self.store.forget_source(&source).await?;
            tracing::info!("Gone: {} (removed {} chunks)", source, chunks);
            removed += 1;
        }
        Ok(removed)
    }

    async fn index_documents(
        &self,
        documents: Vec<Document>,
        report: &mut IngestReport,
    ) -> Result<(), ApiError> {
        let mut by_source: BTreeMap<String, Vec<Document>> = BTreeMap::new();
        for document in documents {
            by_source
                .entry(document.metadata.source.clone())
                .or_default()
                .push(document);
        }

        for (source, docs) in by_source {
            let hash = docs[0].metadata.content_hash.clone();

            match self.store.source_hash(&source).await? {
                Some(stored) if stored == hash => {
                    tracing::info!("Unchanged, skipping: {}", source);
                    report.skipped_unchanged += 1;
                    continue;
                }
                Some(_) => {
                    let removed = self.store.delete_source(&source).await?;
                    tracing::info!("Changed: {} (removed {} old chunks)", source, removed);
                }
                None => {}
            }

            let chunks = self.splitter.split_documents(&docs);
            report.chunks += chunks.len();
            report.embedded += self.embed_and_store(chunks).await?;
            self.store.record_source_hash(&source, &hash).await?;
        }

        Ok(())
    }

    async fn embed_and_store(&self, chunks: Vec<Chunk>) -> Result<usize, ApiError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size).await?;

        let items: Vec<(Chunk, Vec<f32>)> = chunks.into_iter().zip(vectors).collect();
        self.store.upsert(items).await
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::store::MemoryVectorStore;

    struct LetterEmbedder {
        documents_embedded: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        fn name(&self) -> &str {
            "letters"
        }

        fn dimension(&self) -> Option<usize> {
            Some(3)
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            self.documents_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| letter_vector(t)).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
            Ok(letter_vector(text))
        }
    }

    fn letter_vector(text: &str) -> Vec<f32> {
        let count = |c: char| text.chars().filter(|x| x.eq_ignore_ascii_case(&c)).count() as f32;
        vec![count('a'), count('e'), 1.0]
    }

    fn pipeline() -> (IngestPipeline, Arc<LetterEmbedder>, Arc<MemoryVectorStore>) {
        let embedder = Arc::new(LetterEmbedder {
            documents_embedded: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryVectorStore::new());
        let settings = IngestSettings {
            chunk_size: 40,
            chunk_overlap: 10,
            ..IngestSettings::default()
        };
        let pipeline = IngestPipeline::from_settings(&settings, embedder.clone(), store.clone()).unwrap();
        (pipeline, embedder, store)
    }

    #[tokio::test]
    async fn ingests_and_skips_unchanged_sources() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "Annual leave is twenty days a year for everyone.").unwrap();
        fs::write(tmp.path().join("b.md"), "# Sick leave\nTen days.").unwrap();

        let (pipeline, embedder, store) = pipeline();
        let first = pipeline.run(tmp.path()).await.unwrap();

        assert_eq!(first.documents, 2);
        assert!(first.chunks >= 3);
        assert_eq!(first.embedded, first.chunks);
        assert_eq!(first.total_vectors, store.count().await.unwrap());
        let embedded_once = embedder.documents_embedded.load(Ordering::SeqCst);

        let second = pipeline.run(tmp.path()).await.unwrap();
        assert_eq!(second.skipped_unchanged, 2);
        assert_eq!(second.embedded, 0);
        assert_eq!(second.total_vectors, first.total_vectors);
        assert_eq!(embedder.documents_embedded.load(Ordering::SeqCst), embedded_once);
    }

    #[tokio::test]
    async fn changed_sources_replace_their_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("policy.txt");
        fs::write(&path, "Old policy text that is long enough to need two chunks here.").unwrap();

        let (pipeline, _, store) = pipeline();
        pipeline.run(tmp.path()).await.unwrap();

        fs::write(&path, "New policy.").unwrap();
        let report = pipeline.run(tmp.path()).await.unwrap();

        assert_eq!(report.embedded, 1);
        assert_eq!(report.total_vectors, 1);
        let stored = store.sample(10).await.unwrap();
        assert_eq!(stored[0].0.text, "New policy.");
    }

    #[tokio::test]
    async fn deleted_and_unreadable_files_drop_their_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "Old carry-over rule: five days.").unwrap();
        fs::write(tmp.path().join("b.txt"), "Bank holidays are paid.").unwrap();
        fs::write(tmp.path().join("c.json"), r#"[{"text": "Leave requests need two weeks notice."}]"#).unwrap();
        fs::write(other.path().join("d.txt"), "Another folder keeps its chunks.").unwrap();

        let (pipeline, _, store) = pipeline();
        pipeline.run(tmp.path()).await.unwrap();
        pipeline.run(other.path()).await.unwrap();

        fs::remove_file(tmp.path().join("a.txt")).unwrap();
        fs::write(tmp.path().join("c.json"), "[not json").unwrap();
        let report = pipeline.run(tmp.path()).await.unwrap();

        assert_eq!(report.removed_sources, 2);
        assert_eq!(report.skipped_unchanged, 1);
        assert_eq!(report.failures.len(), 1);
        let texts: Vec<String> = store
            .sample(10)
            .await
            .unwrap()
            .into_iter()
            .map(|(chunk, _)| chunk.text)
            .collect();
        assert_eq!(texts.len(), 2);
        assert!(!texts.iter().any(|t| t.contains("carry-over")));
        assert!(!texts.iter().any(|t| t.contains("notice")));
        assert!(texts.iter().any(|t| t.contains("Another folder")));
        assert_eq!(store.list_sources().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn json_files_sharing_item_ids_keep_both_items() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.json"), r#"[{"id": "1", "text": "Annual leave is twenty days."}]"#).unwrap();
        fs::write(tmp.path().join("b.json"), r#"[{"id": "1", "text": "Sick leave is ten days."}]"#).unwrap();

        let (pipeline, _, store) = pipeline();
        let report = pipeline.run(tmp.path()).await.unwrap();

        assert_eq!(report.embedded, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        let removed = store
            .delete_source(&tmp.path().join("a.json").display().to_string())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_folder_is_a_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let (pipeline, _, _) = pipeline();
        let err = pipeline.run(tmp.path()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn uploads_are_deduplicated_by_content() {
        let (pipeline, embedder, _) = pipeline();
        let bytes = b"Christmas Day is a public holiday.".to_vec();

        let first = pipeline.ingest_bytes("holidays.txt", bytes.clone()).await.unwrap();
        let second = pipeline.ingest_bytes("holidays.txt", bytes).await.unwrap();

        assert_eq!(first.embedded, 1);
        assert_eq!(second.skipped_unchanged, 1);
        assert_eq!(embedder.documents_embedded.load(Ordering::SeqCst), 1);

        assert!(matches!(
            pipeline.ingest_bytes("empty.txt", Vec::new()).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
