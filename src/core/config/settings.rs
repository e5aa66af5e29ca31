//! Typed view over the merged YAML configuration.
//!
//! `ConfigService` works on untyped `serde_json::Value` trees so it can merge
//! and redact them; everything downstream reads these structs instead.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestSettings,
    pub store: StoreSettings,
    pub embedding: EmbeddingSettings,
    pub chat: ChatSettings,
    pub openai: OpenAiSettings,
    pub pinecone: PineconeSettings,
    pub server: ServerSettings,
}

impl AppConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ApiError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ApiError::BadRequest(format!("Invalid config: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Folder scanned by `ingest` when no `--folder` is given.
    pub data_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Cap on JSON files read per run; `None` reads them all.
    pub max_json_files: Option<usize>,
    pub embed_batch_size: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            chunk_size: 1000,
            chunk_overlap: 200,
            max_json_files: None,
            embed_batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    #[serde(alias = "local")]
    Sqlite,
    Pinecone,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "local" => Ok(Self::Sqlite),
            "pinecone" => Ok(Self::Pinecone),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sqlite => "sqlite",
            Self::Pinecone => "pinecone",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Overrides `<data_dir>/vectorstore.db` for the sqlite backend.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Openai,
    Pinecone,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    /// Falls back to the provider's default model when unset.
    pub model: Option<String>,
    /// Falls back to the provider's known dimension when unset.
    pub dimension: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_k: usize,
    pub min_score: Option<f32>,
    pub show_sources: bool,
    pub max_context_chars: usize,
    pub max_history: usize,
    pub system_prompt: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.0,
            max_tokens: 512,
            top_k: 4,
            min_score: None,
            show_sources: true,
            max_context_chars: 8000,
            max_history: 100,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PineconeSettings {
    pub api_key: Option<String>,
    pub index_name: String,
    pub namespace: String,
    pub cloud: String,
    pub region: String,
    pub metric: String,
    pub control_url: String,
}

impl Default for PineconeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            index_name: "holiday-chatbot".to_string(),
            namespace: "ns1".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            metric: "cosine".to_string(),
            control_url: "https://api.pinecone.io".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub api_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
            cors_allowed_origins: Vec::new(),
            api_token: None,
        }
    }
}
