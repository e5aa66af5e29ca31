use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::Embedder;
use crate::core::config::OpenAiSettings;
use crate::core::errors::ApiError;

pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// `POST {base_url}/embeddings` against OpenAI or any compatible server.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: Option<usize>,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(
        settings: &OpenAiSettings,
        model: Option<String>,
        dimension: Option<usize>,
    ) -> Result<Self, ApiError> {
        let api_key = settings.api_key.clone().filter(|key| !key.trim().is_empty());
        if api_key.is_none() && settings.base_url.contains("api.openai.com") {
            return Err(ApiError::BadRequest(
                "OpenAI API key missing: set OPENAI_API_KEY or openai.api_key".to_string(),
            ));
        }

        let model = model.unwrap_or_else(|| DEFAULT_OPENAI_EMBEDDING_MODEL.to_string());
        let dimension = dimension.or_else(|| known_dimension(&model));

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimension,
            client: Client::new(),
        })
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&json!({
            "model": self.model,
            "input": inputs,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await.map_err(ApiError::upstream)?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "OpenAI embeddings error ({}): {}",
                status, text
            )));
        }

        let mut payload: EmbeddingResponse = res.json().await.map_err(ApiError::upstream)?;
        payload.data.sort_by_key(|item| item.index);
        Ok(payload.data.into_iter().map(|item| item.embedding).collect())
    }
}

fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-ada-002" | "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        self.embed(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("OpenAI returned no embedding".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(server: &MockServer) -> OpenAiSettings {
        OpenAiSettings {
            api_key: Some("sk-test".to_string()),
            base_url: server.url("/v1"),
        }
    }

    #[test]
    fn official_endpoint_needs_a_key() {
        let err = OpenAiEmbedder::new(&OpenAiSettings::default(), None, None)
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn known_models_report_their_dimension() {
        let settings = OpenAiSettings {
            api_key: Some("k".to_string()),
            ..OpenAiSettings::default()
        };
        let embedder = OpenAiEmbedder::new(&settings, None, None).unwrap();
        assert_eq!(embedder.name(), "text-embedding-ada-002");
        assert_eq!(embedder.dimension(), Some(1536));

        let custom = OpenAiEmbedder::new(&settings, Some("nomic-embed".to_string()), None).unwrap();
        assert_eq!(custom.dimension(), None);
    }

    #[tokio::test]
    async fn embeddings_are_returned_in_index_order() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .header("Authorization", "Bearer sk-test")
                .json_body_partial(r#"{"model": "text-embedding-ada-002", "input": ["a", "b"]}"#);
            then.status(200).json_body(serde_json::json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ]
            }));
        });

        let embedder = OpenAiEmbedder::new(&settings(&server), None, None).unwrap();
        let vectors = embedder
            .embed_documents(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        mock.assert();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn error_responses_become_upstream_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(429).body("rate limited");
        });

        let embedder = OpenAiEmbedder::new(&settings(&server), None, None).unwrap();
        match embedder.embed_query("hello").await {
            Err(ApiError::Upstream(msg)) => assert!(msg.contains("rate limited")),
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_input_skips_the_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(500);
        });

        let embedder = OpenAiEmbedder::new(&settings(&server), None, None).unwrap();
        assert!(embedder.embed_documents(&[]).await.unwrap().is_empty());
        mock.assert_hits(0);
    }
}
