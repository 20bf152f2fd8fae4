//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait and a local implementation running a
//! Korean SBERT model (768 dimensions, L2-normalized) through ONNX Runtime. The
//! provider is created via [`create_provider`] from configuration.

pub mod local;

use anyhow::Result;

/// Embedding width of the reference model (KR-SBERT-V40K-klueNLI-augSTS).
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

/// Trait for embedding text into vectors.
///
/// Implementations are deterministic for a fixed model and produce vectors of
/// exactly [`dimensions`](EmbeddingProvider::dimensions) floats. All methods are
/// synchronous; callers in async contexts should use `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        DEFAULT_EMBEDDING_DIM
    }
}

/// Create an embedding provider from config.
///
/// Currently only `"local"` is supported (ONNX Runtime + tokenizer from the cache dir).
/// Returns an error if model files are not found; run `hazard-index model download` first.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}
