use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::Embedder;
use crate::core::config::PineconeSettings;
use crate::core::errors::ApiError;

pub const DEFAULT_PINECONE_EMBEDDING_MODEL: &str = "multilingual-e5-large";
const API_VERSION: &str = "2024-10";
/// Largest input list the hosted e5 model accepts per request.
const MAX_INPUTS_PER_REQUEST: usize = 96;

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Deserialize)]
struct EmbedItem {
    values: Vec<f32>,
}

/// Pinecone Inference `POST {control_url}/embed`.
#[derive(Clone)]
pub struct PineconeEmbedder {
    control_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    client: Client,
}

impl PineconeEmbedder {
    pub fn new(
        settings: &PineconeSettings,
        model: Option<String>,
        dimension: Option<usize>,
    ) -> Result<Self, ApiError> {
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
            control_url: settings.control_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_PINECONE_EMBEDDING_MODEL.to_string()),
            dimension: dimension.unwrap_or(1024),
            client: Client::new(),
        })
    }

    async fn embed(&self, inputs: &[String], input_type: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut vectors = Vec::with_capacity(inputs.len());

        for batch in inputs.chunks(MAX_INPUTS_PER_REQUEST) {
            let body = json!({
                "model": self.model,
                "inputs": batch.iter().map(|text| json!({ "text": text })).collect::<Vec<_>>(),
                "parameters": { "input_type": input_type, "truncate": "END" },
            });

            let res = self
                .client
                .post(format!("{}/embed", self.control_url))
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(ApiError::upstream)?;

            if !res.status().is_success() {
                let status = res.status();
                let text = res.text().await.unwrap_or_default();
                return Err(ApiError::Upstream(format!(
                    "Pinecone embed error ({}): {}",
                    status, text
                )));
            }

            let payload: EmbedResponse = res.json().await.map_err(ApiError::upstream)?;
            vectors.extend(payload.data.into_iter().map(|item| item.values));
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for PineconeEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        self.embed(texts, "passage").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embed(&[text.to_string()], "query")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("Pinecone returned no embedding".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn embedder(server: &MockServer) -> PineconeEmbedder {
        let settings = PineconeSettings {
            api_key: Some("pc-key".to_string()),
            control_url: server.base_url(),
            ..PineconeSettings::default()
        };
        PineconeEmbedder::new(&settings, None, None).unwrap()
    }

    #[tokio::test]
    async fn passages_and_queries_use_their_input_type() {
        let server = MockServer::start();
        let passages = server.mock(|when, then| {
            when.method(POST)
                .path("/embed")
                .header("Api-Key", "pc-key")
                .header("X-Pinecone-API-Version", API_VERSION)
                .json_body_partial(
                    r#"{"model": "multilingual-e5-large", "inputs": [{"text": "leave"}], "parameters": {"input_type": "passage", "truncate": "END"}}"#,
                );
            then.status(200)
                .json_body(serde_json::json!({ "data": [{ "values": [0.25, 0.5] }] }));
        });
        let queries = server.mock(|when, then| {
            when.method(POST)
                .path("/embed")
                .json_body_partial(r#"{"parameters": {"input_type": "query"}}"#);
            then.status(200)
                .json_body(serde_json::json!({ "data": [{ "values": [1.0, 0.0] }] }));
        });

        let embedder = embedder(&server);
        let docs = embedder.embed_documents(&["leave".to_string()]).await.unwrap();
        let query = embedder.embed_query("how many days?").await.unwrap();

        passages.assert();
        queries.assert();
        assert_eq!(docs, vec![vec![0.25, 0.5]]);
        assert_eq!(query, vec![1.0, 0.0]);
        assert_eq!(embedder.dimension(), Some(1024));
    }

    #[tokio::test]
    async fn large_inputs_are_split_into_requests() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(200)
                .json_body(serde_json::json!({ "data": [{ "values": [1.0] }] }));
        });

        let inputs: Vec<String> = (0..MAX_INPUTS_PER_REQUEST + 1).map(|i| i.to_string()).collect();
        let vectors = embedder(&server).embed_documents(&inputs).await.unwrap();

        mock.assert_hits(2);
        // The mock answers one vector per request, so the caller sees a short result.
        assert_eq!(vectors.len(), 2);
    }

    #[test]
    fn missing_key_is_rejected() {
        assert!(PineconeEmbedder::new(&PineconeSettings::default(), None, None).is_err());
    }
}
