use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize vector store: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Failed to initialize embedding provider: {0}")]
    Embedder(#[source] anyhow::Error),

    #[error("Failed to initialize chat model: {0}")]
    ChatModel(#[source] anyhow::Error),
}
