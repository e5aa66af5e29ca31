use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::ChatModel;
use super::types::ChatRequest;
use crate::core::config::{ChatSettings, OpenAiSettings};
use crate::core::errors::ApiError;

/// OpenAI-compatible `/chat/completions` client. Works against OpenAI itself
/// and local servers such as LM Studio via `openai.base_url`.
#[derive(Clone)]
pub struct OpenAiChatModel {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl OpenAiChatModel {
    pub fn new(openai: &OpenAiSettings, chat: &ChatSettings) -> Result<Self, ApiError> {
        let api_key = openai.api_key.clone().filter(|key| !key.trim().is_empty());
        if api_key.is_none() && openai.base_url.contains("api.openai.com") {
            return Err(ApiError::BadRequest(
                "OpenAI API key missing: set OPENAI_API_KEY or openai.api_key".to_string(),
            ));
        }

        Ok(Self {
            base_url: openai.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: chat.model.clone(),
            client: Client::new(),
        })
    }

    fn body(&self, request: ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature { obj.insert("temperature".to_string(), json!(t)); }
            if let Some(t) = request.max_tokens { obj.insert("max_tokens".to_string(), json!(t)); }
            if let Some(s) = request.stop { obj.insert("stop".to_string(), json!(s)); }
        }

        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let res = builder.send().await.map_err(ApiError::upstream)?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Chat completion error ({}): {}",
                status, text
            )));
        }
        Ok(res)
    }
}

/// Splits a byte stream into lines. Network chunks can end mid-line or in the
/// middle of a multi-byte character, so bytes are only decoded once a full
/// line has arrived.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

/// Content of one SSE line. `None` means the line carries nothing to emit;
/// `Some(Err(()))` marks the end of the stream.
fn parse_sse_line(line: &str) -> Option<Result<String, ()>> {
    let line = line.trim();
    if line == "data: [DONE]" {
        return Some(Err(()));
    }
    let data = line.strip_prefix("data:")?.trim_start();
    let json: Value = serde_json::from_str(data).ok()?;
    let content = json["choices"][0]["delta"]["content"].as_str()?;
    if content.is_empty() {
        return None;
    }
    Some(Ok(content.to_string()))
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, ApiError> {
        let body = self.body(request, false);
        let res = self.post(&body).await?;
        let payload: Value = res.json().await.map_err(ApiError::upstream)?;

        let Some(choice) = payload["choices"].as_array().and_then(|c| c.first()) else {
            return Err(ApiError::Upstream("empty completion".to_string()));
        };

        Ok(choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let body = self.body(request, true);
        let res = self.post(&body).await?;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut lines = SseLineBuffer::default();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        for line in lines.push(&bytes) {
                            match parse_sse_line(&line) {
                                Some(Ok(content)) => {
                                    if tx.send(Ok(content)).await.is_err() {
                                        return;
                                    }
                                }
                                Some(Err(())) => return,
                                None => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::upstream(e))).await;
                        return;
                    }
                }
            }
            if let Some(Ok(content)) = parse_sse_line(&lines.finish()) {
                let _ = tx.send(Ok(content)).await;
            }
        });

        Ok(rx)
    }
}
