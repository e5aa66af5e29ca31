//! Pinecone serverless index over the REST API.
//!
//! The control plane (`control_url`) lists, creates and describes indexes;
//! the data plane lives on the per-index host returned by `describe_index`.
//! Chunk vectors go to the configured namespace. Per-source content hashes
//! go to a sibling `{namespace}-sources` namespace so they never show up in
//! searches or counts.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use super::{check_dimension, ScoredChunk, StoreStats, VectorStore};
use crate::core::config::PineconeSettings;
use crate::core::errors::ApiError;
use crate::ingest::{Chunk, DocumentKind};

const API_VERSION: &str = "2024-10";
const UPSERT_BATCH: usize = 100;
const DELETE_BATCH: usize = 1000;
const READY_POLL_ATTEMPTS: u32 = 60;
/// Deletes are eventually consistent, so bound the query/delete rounds.
const MAX_DELETE_ROUNDS: usize = 50;

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    name: String,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: Option<String>,
}

pub struct PineconeStore {
    client: Client,
    api_key: String,
    settings: PineconeSettings,
    host: RwLock<Option<String>>,
    dimension: RwLock<Option<usize>>,
    poll_interval: Duration,
}

impl PineconeStore {
    pub fn new(settings: &PineconeSettings) -> Result<Self, ApiError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ApiError::BadRequest(
                    "Pinecone API key missing: set PINECONE_API_KEY or pinecone.api_key"
                        .to_string(),
                )
            })?;

        Ok(Self {
            client: Client::new(),
            api_key,
            settings: settings.clone(),
            host: RwLock::new(None),
            dimension: RwLock::new(None),
            poll_interval: Duration::from_secs(1),
        })
    }

    /// Skips index discovery and talks to `host` directly.
    pub fn with_host(self, host: impl Into<String>) -> Self {
        Self {
            host: RwLock::new(Some(normalize_host(&host.into()))),
            ..self
        }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    fn sources_namespace(&self) -> String {
        format!("{}-sources", self.settings.namespace)
    }

    fn control_url(&self, path: &str) -> String {
        format!("{}{}", self.settings.control_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let res = builder.send().await.map_err(ApiError::upstream)?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Pinecone {} failed ({}): {}",
                what, status, text
            )));
        }
        Ok(res)
    }

    async fn list_indexes(&self) -> Result<Vec<IndexDescription>, ApiError> {
        let url = self.control_url("/indexes");
        let res = self
            .send(self.request(Method::GET, &url), "list indexes")
            .await?;
        let list: IndexList = res.json().await.map_err(ApiError::upstream)?;
        Ok(list.indexes)
    }

    async fn describe_index(&self) -> Result<Option<IndexDescription>, ApiError> {
        let url = self.control_url(&format!("/indexes/{}", self.settings.index_name));
        let res = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(ApiError::upstream)?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Pinecone describe index failed ({}): {}",
                status, text
            )));
        }
        res.json().await.map(Some).map_err(ApiError::upstream)
    }

    async fn create_index(&self, dimension: usize) -> Result<(), ApiError> {
        tracing::info!(
            "Creating Pinecone index '{}' (dimension {}, metric {}, {}/{})",
            self.settings.index_name,
            dimension,
            self.settings.metric,
            self.settings.cloud,
            self.settings.region
        );
        let body = json!({
            "name": self.settings.index_name,
            "dimension": dimension,
            "metric": self.settings.metric,
            "spec": {
                "serverless": {
                    "cloud": self.settings.cloud,
                    "region": self.settings.region,
                }
            }
        });
        let url = self.control_url("/indexes");
        self.send(self.request(Method::POST, &url).json(&body), "create index")
            .await?;
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<IndexDescription, ApiError> {
        for attempt in 1..=READY_POLL_ATTEMPTS {
            if let Some(index) = self.describe_index().await? {
                if index.status.ready && !index.host.is_empty() {
                    return Ok(index);
                }
                tracing::debug!(
                    "Waiting for index '{}' (state {:?}, attempt {})",
                    index.name,
                    index.status.state,
                    attempt
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(ApiError::ServiceUnavailable(format!(
            "Pinecone index '{}' did not become ready",
            self.settings.index_name
        )))
    }

    /// Data-plane host, discovered on first use.
    async fn host(&self) -> Result<String, ApiError> {
        if let Some(host) = self.host.read().await.clone() {
            return Ok(host);
        }

        let index = self.describe_index().await?.ok_or_else(|| {
            ApiError::NotFound(format!(
                "Pinecone index '{}' does not exist; run ingest first",
                self.settings.index_name
            ))
        })?;
        let host = normalize_host(&index.host);
        *self.host.write().await = Some(host.clone());
        if let Some(dimension) = index.dimension {
            self.dimension.write().await.get_or_insert(dimension);
        }
        Ok(host)
    }

    async fn data_post(&self, path: &str, body: Value, what: &str) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.host().await?, path);
        let res = self
            .send(self.request(Method::POST, &url).json(&body), what)
            .await?;
        res.json().await.map_err(ApiError::upstream)
    }

    async fn fetch(&self, ids: &[String], namespace: &str) -> Result<Map<String, Value>, ApiError> {
        let url = format!("{}/vectors/fetch", self.host().await?);
        let mut query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        query.push(("namespace", namespace));

        let res = self
            .send(self.request(Method::GET, &url).query(&query), "fetch")
            .await?;
        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        Ok(payload["vectors"].as_object().cloned().unwrap_or_default())
    }

    /// A vector Pinecone accepts but that ranks nowhere near real chunks.
    async fn placeholder_vector(&self) -> Result<Vec<f32>, ApiError> {
        self.host().await?;
        let dimension = self.dimension.read().await.ok_or_else(|| {
            ApiError::ServiceUnavailable("Pinecone index dimension unknown".to_string())
        })?;
        let mut values = vec![0.0f32; dimension];
        if let Some(first) = values.first_mut() {
            *first = 1e-6;
        }
        Ok(values)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), ApiError> {
        let url = format!("{}/vectors/delete", self.host().await?);
        let res = self
            .request(Method::POST, &url)
            .json(&json!({ "deleteAll": true, "namespace": namespace }))
            .send()
            .await
            .map_err(ApiError::upstream)?;
        // Deleting a namespace that was never written is not an error for us.
        if res.status().is_success() || res.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        Err(ApiError::Upstream(format!(
            "Pinecone delete failed ({}): {}",
            status, text
        )))
    }

    async fn describe_stats(&self) -> Result<Value, ApiError> {
        self.data_post("/describe_index_stats", json!({}), "describe index stats")
            .await
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn chunk_metadata(chunk: &Chunk) -> Value {
    let mut metadata = json!({
        "text": chunk.text,
        "source": chunk.source,
        "kind": chunk.kind.as_str(),
        "chunk_index": chunk.chunk_index,
        "start_offset": chunk.start_offset,
    });
    // Pinecone rejects null metadata values.
    if let (Some(page), Some(map)) = (chunk.page, metadata.as_object_mut()) {
        map.insert("page".to_string(), json!(page));
    }
    metadata
}

fn chunk_from_metadata(id: &str, metadata: &Value) -> Chunk {
    let as_usize = |key: &str| metadata[key].as_f64().map(|v| v as usize).unwrap_or(0);
    Chunk {
        id: id.to_string(),
        text: metadata["text"].as_str().unwrap_or_default().to_string(),
        source: metadata["source"].as_str().unwrap_or_default().to_string(),
        kind: metadata["kind"]
            .as_str()
            .and_then(DocumentKind::parse)
            .unwrap_or(DocumentKind::Txt),
        page: metadata["page"].as_f64().map(|p| p as u32),
        chunk_index: as_usize("chunk_index"),
        start_offset: as_usize("start_offset"),
    }
}

fn values_of(record: &Value) -> Vec<f32> {
    record["values"]
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn name(&self) -> &'static str {
        "pinecone"
    }

    async fn ensure_ready(&self, dimension: usize) -> Result<(), ApiError> {
        let existing = self
            .list_indexes()
            .await?
            .into_iter()
            .find(|index| index.name == self.settings.index_name);

        match existing {
            Some(index) => {
                check_dimension(index.dimension, dimension)?;
                tracing::info!("Using existing Pinecone index '{}'", index.name);
            }
            None => self.create_index(dimension).await?,
        }

        let index = self.wait_until_ready().await?;
        *self.host.write().await = Some(normalize_host(&index.host));
        *self.dimension.write().await = Some(index.dimension.unwrap_or(dimension));
        tracing::info!("Pinecone index '{}' ready at {}", index.name, index.host);
        Ok(())
    }

    async fn upsert(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<usize, ApiError> {
        let dimension = *self.dimension.read().await;
        for (_, values) in &items {
            check_dimension(dimension, values.len())?;
        }

        let mut written = 0usize;
        for batch in items.chunks(UPSERT_BATCH) {
            let vectors: Vec<Value> = batch
                .iter()
                .map(|(chunk, values)| {
                    json!({
                        "id": chunk.id,
                        "values": values,
                        "metadata": chunk_metadata(chunk),
                    })
                })
                .collect();

            let response = self
                .data_post(
                    "/vectors/upsert",
                    json!({ "vectors": vectors, "namespace": self.settings.namespace }),
                    "upsert",
                )
                .await?;
            written += response["upsertedCount"]
                .as_u64()
                .map(|n| n as usize)
                .unwrap_or(batch.len());
        }

        tracing::debug!("Upserted {} vectors into '{}'", written, self.settings.namespace);
        Ok(written)
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

        let response = self
            .data_post(
                "/query",
                json!({
                    "vector": query,
                    "topK": k,
                    "namespace": self.settings.namespace,
                    "includeMetadata": true,
                    "includeValues": false,
                }),
                "query",
            )
            .await?;

        let mut hits: Vec<ScoredChunk> = response["matches"]
            .as_array()
            .map(|matches| {
                matches
                    .iter()
                    .filter_map(|m| {
                        let id = m["id"].as_str()?;
                        let score = m["score"].as_f64()? as f32;
                        Some(ScoredChunk {
                            chunk: chunk_from_metadata(id, &m["metadata"]),
                            score,
                        })
                    })
                    .filter(|hit| min_score.map_or(true, |min| hit.score >= min))
                    .collect()
            })
            .unwrap_or_default();

        crate::vector_math::sort_by_score_desc(&mut hits, |hit| hit.score);
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let stats = self.describe_stats().await?;
        Ok(stats["namespaces"][&self.settings.namespace]["vectorCount"]
            .as_u64()
            .unwrap_or(0) as usize)
    }

    async fn stats(&self) -> Result<StoreStats, ApiError> {
        let stats = self.describe_stats().await?;
        let namespaces: BTreeMap<String, usize> = stats["namespaces"]
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(name, ns)| {
                        (name.clone(), ns["vectorCount"].as_u64().unwrap_or(0) as usize)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(StoreStats {
            backend: self.name().to_string(),
            total_vectors: namespaces
                .get(&self.settings.namespace)
                .copied()
                .unwrap_or(0),
            dimension: stats["dimension"].as_u64().map(|d| d as usize),
            namespaces,
        })
    }

    async fn sample(&self, limit: usize) -> Result<Vec<(Chunk, Vec<f32>)>, ApiError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let url = format!("{}/vectors/list", self.host().await?);
        let limit_param = limit.to_string();
        let res = self
            .send(
                self.request(Method::GET, &url).query(&[
                    ("namespace", self.settings.namespace.as_str()),
                    ("limit", limit_param.as_str()),
                ]),
                "list vectors",
            )
            .await?;
        let listing: Value = res.json().await.map_err(ApiError::upstream)?;
        let ids: Vec<String> = listing["vectors"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item["id"].as_str().map(str::to_string))
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default();

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.fetch(&ids, &self.settings.namespace).await?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let record = records.get(id)?;
                Some((chunk_from_metadata(id, &record["metadata"]), values_of(record)))
            })
            .collect())
    }

    async fn delete_source(&self, source: &str) -> Result<usize, ApiError> {
        // Serverless indexes only delete by id, so find the ids first.
        let probe = self.placeholder_vector().await?;
        let mut deleted = 0usize;

        for _ in 0..MAX_DELETE_ROUNDS {
            let response = self
                .data_post(
                    "/query",
                    json!({
                        "vector": probe,
                        "topK": DELETE_BATCH,
                        "namespace": self.settings.namespace,
                        "filter": { "source": { "$eq": source } },
                        "includeMetadata": false,
                        "includeValues": false,
                    }),
                    "query",
                )
                .await?;

            let ids: Vec<String> = response["matches"]
                .as_array()
                .map(|matches| {
                    matches
                        .iter()
                        .filter_map(|m| m["id"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            if ids.is_empty() {
                break;
            }

            self.data_post(
                "/vectors/delete",
                json!({ "ids": ids, "namespace": self.settings.namespace }),
                "delete",
            )
            .await?;
            deleted += ids.len();

            if ids.len() < DELETE_BATCH {
                break;
            }
        }

        if deleted > 0 {
            tracing::info!("Deleted {} stale vectors for {}", deleted, source);
        }
        Ok(deleted)
    }

    async fn source_hash(&self, source: &str) -> Result<Option<String>, ApiError> {
        let records = self
            .fetch(&[source.to_string()], &self.sources_namespace())
            .await?;
        Ok(records
            .get(source)
            .and_then(|record| record["metadata"]["content_hash"].as_str())
            .map(str::to_string))
    }

    async fn record_source_hash(&self, source: &str, hash: &str) -> Result<(), ApiError> {
        let values = self.placeholder_vector().await?;
        self.data_post(
            "/vectors/upsert",
            json!({
                "vectors": [{
                    "id": source,
                    "values": values,
                    "metadata": { "source": source, "content_hash": hash },
                }],
                "namespace": self.sources_namespace(),
            }),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/vectors/list", self.host().await?);
        let namespace = self.sources_namespace();
        let mut sources = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let mut builder = self
                .request(Method::GET, &url)
                .query(&[("namespace", namespace.as_str())]);
            if let Some(token) = &next {
                builder = builder.query(&[("paginationToken", token.as_str())]);
            }
            let res = builder.send().await.map_err(ApiError::upstream)?;
            // Nothing recorded yet: the namespace does not exist.
            if res.status() == StatusCode::NOT_FOUND {
                break;
            }
            if !res.status().is_success() {
                let status = res.status();
                let text = res.text().await.unwrap_or_default();
                return Err(ApiError::Upstream(format!(
                    "Pinecone list sources failed ({}): {}",
                    status, text
                )));
            }
            let page: Value = res.json().await.map_err(ApiError::upstream)?;
            if let Some(items) = page["vectors"].as_array() {
                sources.extend(
                    items
                        .iter()
                        .filter_map(|item| item["id"].as_str().map(str::to_string)),
                );
            }
            next = page["pagination"]["next"].as_str().map(str::to_string);
            if next.is_none() {
                break;
            }
        }

        sources.sort();
        Ok(sources)
    }

    async fn forget_source(&self, source: &str) -> Result<(), ApiError> {
        self.data_post(
            "/vectors/delete",
            json!({ "ids": [source], "namespace": self.sources_namespace() }),
            "delete",
        )
        .await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), ApiError> {
        self.delete_namespace(&self.settings.namespace).await?;
        self.delete_namespace(&self.sources_namespace()).await?;
        tracing::info!(
            "Cleared namespaces '{}' and '{}'",
            self.settings.namespace,
            self.sources_namespace()
        );
        Ok(())
    }
}
