use std::sync::Arc;

use crate::chat::ChatBot;
use crate::core::config::{
    AppConfig, AppPaths, ConfigService, EmbeddingProviderKind, StoreBackend,
};
use crate::core::security::ApiToken;
use crate::embedding::{Embedder, OpenAiEmbedder, PineconeEmbedder};
use crate::ingest::IngestPipeline;
use crate::llm::{ChatModel, OpenAiChatModel};
use crate::store::{MemoryVectorStore, PineconeStore, SqliteVectorStore, VectorStore};

pub mod error;

use error::InitializationError;

/// Command-line values that win over the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub store: Option<StoreBackend>,
    pub top_k: Option<usize>,
    pub model: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl SettingsOverrides {
    pub fn apply(&self, settings: &mut AppConfig) {
        if let Some(store) = self.store {
            settings.store.backend = store;
        }
        if let Some(top_k) = self.top_k {
            settings.chat.top_k = top_k;
        }
        if let Some(model) = &self.model {
            settings.chat.model = model.clone();
        }
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

/// Everything the CLI commands and HTTP handlers share.
///
/// Holds:
/// - Paths and the config service (for redacted config views)
/// - The resolved settings
/// - The chat bot and the ingest pipeline, built over the same store and embedder
/// - The API token guarding the HTTP routes
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: AppConfig,
    pub bot: Arc<ChatBot>,
    pub pipeline: Arc<IngestPipeline>,
    pub api_token: ApiToken,
}

impl AppState {
    /// Loads configuration and wires the providers.
    ///
    /// Order:
    /// 1. Load and merge config, then apply CLI overrides
    /// 2. Build the embedding provider
    /// 3. Open the vector store for the selected backend (sqlite compares the
    ///    stored embedding model with the provider's)
    /// 4. Build the chat model
    /// 5. Assemble the chat bot and ingest pipeline
    pub async fn initialize(
        paths: AppPaths,
        overrides: &SettingsOverrides,
    ) -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(paths);
        let config = ConfigService::new(paths.clone());
        let mut settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;
        overrides.apply(&mut settings);

        tracing::info!(
            "Using {} store, {:?} embeddings, chat model {}",
            settings.store.backend,
            settings.embedding.provider,
            settings.chat.model
        );

        let embedder = build_embedder(&settings)?;
        let store = build_store(&settings, &paths, embedder.name()).await?;

        let llm: Arc<dyn ChatModel> = Arc::new(
            OpenAiChatModel::new(&settings.openai, &settings.chat)
                .map_err(|e| InitializationError::ChatModel(e.into()))?,
        );

        let api_token = ApiToken::resolve(settings.server.api_token.as_deref());
        Self::assemble(paths, config, settings, store, embedder, llm, api_token)
    }

    /// Builds state over ready-made providers.
    pub fn from_parts(
        paths: AppPaths,
        settings: AppConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        api_token: ApiToken,
    ) -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(paths);
        let config = ConfigService::new(paths.clone());
        Self::assemble(paths, config, settings, store, embedder, llm, api_token)
    }

    fn assemble(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: AppConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        api_token: ApiToken,
    ) -> Result<Arc<Self>, InitializationError> {
        let pipeline = IngestPipeline::from_settings(&settings.ingest, embedder.clone(), store.clone())
            .map_err(|e| InitializationError::Config(e.into()))?;
        let bot = ChatBot::new(store, embedder, llm, settings.chat.clone());

        Ok(Arc::new(AppState {
            paths,
            config,
            settings,
            bot: Arc::new(bot),
            pipeline: Arc::new(pipeline),
            api_token,
        }))
    }
}

fn build_embedder(settings: &AppConfig) -> Result<Arc<dyn Embedder>, InitializationError> {
    let model = settings.embedding.model.clone();
    let dimension = settings.embedding.dimension;

    let embedder: Arc<dyn Embedder> = match settings.embedding.provider {
        EmbeddingProviderKind::Openai => Arc::new(
            OpenAiEmbedder::new(&settings.openai, model, dimension)
                .map_err(|e| InitializationError::Embedder(e.into()))?,
        ),
        EmbeddingProviderKind::Pinecone => Arc::new(
            PineconeEmbedder::new(&settings.pinecone, model, dimension)
                .map_err(|e| InitializationError::Embedder(e.into()))?,
        ),
    };
    Ok(embedder)
}

async fn build_store(
    settings: &AppConfig,
    paths: &AppPaths,
    embedding_model: &str,
) -> Result<Arc<dyn VectorStore>, InitializationError> {
    let store: Arc<dyn VectorStore> = match settings.store.backend {
        StoreBackend::Sqlite => {
            let path = settings
                .store
                .path
                .clone()
                .unwrap_or_else(|| paths.store_path.clone());
            let store = SqliteVectorStore::with_path(&path)
                .await
                .map_err(|e| InitializationError::Store(e.into()))?;
            if store
                .sync_embedding_model(embedding_model)
                .await
                .map_err(|e| InitializationError::Store(e.into()))?
            {
                tracing::warn!(
                    "Embedding model changed to {}; cleared {}",
                    embedding_model,
                    store.path().display()
                );
            }
            Arc::new(store)
        }
        StoreBackend::Pinecone => Arc::new(
            PineconeStore::new(&settings.pinecone)
                .map_err(|e| InitializationError::Store(e.into()))?,
        ),
        StoreBackend::Memory => Arc::new(MemoryVectorStore::new()),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_what_was_given() {
        let mut settings = AppConfig::default();
        SettingsOverrides {
            store: Some(StoreBackend::Memory),
            top_k: Some(2),
            ..SettingsOverrides::default()
        }
        .apply(&mut settings);

        assert_eq!(settings.store.backend, StoreBackend::Memory);
        assert_eq!(settings.chat.top_k, 2);
        assert_eq!(settings.chat.model, "gpt-4");
        assert_eq!(settings.server.port, 8501);
    }

    #[tokio::test]
    async fn missing_pinecone_key_fails_as_store_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = AppConfig::default();
        settings.store.backend = StoreBackend::Pinecone;
        settings.pinecone.api_key = None;

        let result = build_store(&settings, &AppPaths::from_data_dir(tmp.path()), "m").await;

        assert!(matches!(result, Err(InitializationError::Store(_))));
    }

    #[tokio::test]
    async fn sqlite_store_honours_path_override() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = AppConfig::default();
        settings.store.path = Some(tmp.path().join("custom.db"));

        let store = build_store(&settings, &AppPaths::from_data_dir(tmp.path()), "text-embedding-ada-002")
            .await
            .unwrap();

        assert_eq!(store.name(), "sqlite");
        assert!(tmp.path().join("custom.db").exists());
    }

    #[tokio::test]
    async fn sqlite_store_is_cleared_when_the_embedder_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::from_data_dir(tmp.path());
        let settings = AppConfig::default();

        let store = build_store(&settings, &paths, "text-embedding-ada-002").await.unwrap();
        store.ensure_ready(2).await.unwrap();
        store
            .upsert(vec![(
                crate::store::test_support::chunk("c0", "hr.md", "Twenty days."),
                vec![1.0, 0.0],
            )])
            .await
            .unwrap();

        let same = build_store(&settings, &paths, "text-embedding-ada-002").await.unwrap();
        assert_eq!(same.count().await.unwrap(), 1);

        let switched = build_store(&settings, &paths, "text-embedding-3-small").await.unwrap();
        assert_eq!(switched.count().await.unwrap(), 0);
    }
}
