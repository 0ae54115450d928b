// Embeddings module
// Content chunking and the Ollama-backed embedding provider

pub mod chunking;
pub mod ollama;

#[cfg(test)]
pub(crate) mod testing;

pub use chunking::{Chunk, ChunkingConfig, TextSpan, chunk_segments, split_text};
pub use ollama::OllamaClient;

use crate::Result;

/// Maps text to fixed-length vectors.
///
/// Every vector in one index must come from the same provider configuration;
/// `model_id` is recorded with the index and checked on reuse.
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the embedding configuration, e.g. the model name
    fn model_id(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
