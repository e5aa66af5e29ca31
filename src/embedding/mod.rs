//! Remote embedding providers.

mod openai;
mod pinecone;

use async_trait::async_trait;

use crate::core::errors::ApiError;

pub use openai::OpenAiEmbedder;
pub use pinecone::PineconeEmbedder;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded alongside stored vectors.
    fn name(&self) -> &str;

    /// Output dimension when known without calling the provider.
    fn dimension(&self) -> Option<usize>;

    /// Embeds texts that will be stored and searched against.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    /// Embeds a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError>;
}

/// Embeds `texts` in slices of `batch_size`, checking that every slice comes
/// back with one vector per input.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, ApiError> {
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(texts.len());

    for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
        let embedded = embedder.embed_documents(batch).await?;
        if embedded.len() != batch.len() {
            return Err(ApiError::Upstream(format!(
                "{} returned {} embeddings for {} inputs",
                embedder.name(),
                embedded.len(),
                batch.len()
            )));
        }
        tracing::debug!(
            "Embedded batch {} ({} texts) with {}",
            batch_no + 1,
            batch.len(),
            embedder.name()
        );
        vectors.extend(embedded);
    }

    Ok(vectors)
}

/// Resolves the embedding dimension, asking the provider once if needed.
pub async fn probe_dimension(embedder: &dyn Embedder) -> Result<usize, ApiError> {
    if let Some(dimension) = embedder.dimension() {
        return Ok(dimension);
    }
    let probe = embedder.embed_query("dimension probe").await?;
    if probe.is_empty() {
        return Err(ApiError::Upstream(format!(
            "{} returned an empty embedding",
            embedder.name()
        )));
    }
    Ok(probe.len())
}
