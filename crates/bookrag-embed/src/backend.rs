use async_trait::async_trait;

use bookrag_core::Result;

/// A provider of dense embeddings for batches of text.
///
/// Implementations own their batching, throttling and retries; callers
/// hand over any number of texts and get one vector per text back, in
/// input order.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed `texts`, returning one vector per input in the same order.
    /// Every returned vector has exactly `dimension()` components.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimensionality of the vectors this backend produces.
    fn dimension(&self) -> usize;

    /// Model identifier, recorded alongside stored vectors.
    fn model(&self) -> &str;
}
