// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedding providers.
//!
//! The engine consumes an opaque `embed(text) -> vector` capability with a
//! stable dimensionality and a stable identity string. The identity is
//! recorded in the vector-store collection metadata so a collection built by
//! one provider is never queried with another.

mod hash;
mod ollama;
mod openai;

use std::sync::Arc;

pub use hash::HashEmbeddingProvider;
pub use ollama::OllamaEmbeddingProvider;
pub use openai::OpenAIEmbeddingProvider;

use crate::config::Config;
use crate::error::EmbeddingError;

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name, e.g. `ollama`.
    fn name(&self) -> &str;

    /// Model name, e.g. `nomic-embed-text`.
    fn model(&self) -> &str;

    /// Embedding dimensions, stable for the provider's lifetime.
    fn dimensions(&self) -> usize;

    /// Generate an embedding for one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Stable identity recorded alongside the collection.
    fn identity(&self) -> String {
        format!("{}/{}", self.name(), self.model())
    }
}

/// Create an embedding provider for the given configuration.
///
/// Offline mode always yields the deterministic hashing provider; otherwise
/// OpenAI is preferred when an API key is present, with Ollama as the local
/// fallback.
pub fn create_embedding_provider(config: &Config) -> Arc<dyn EmbeddingProvider> {
    if config.offline_mode {
        return Arc::new(HashEmbeddingProvider::new());
    }
    if std::env::var("OPENAI_API_KEY").is_ok() {
        return Arc::new(OpenAIEmbeddingProvider::new(None));
    }
    Arc::new(OllamaEmbeddingProvider::new("nomic-embed-text", None))
}

/// Cosine similarity between two vectors; 0.0 for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-5);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-5);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-5);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_offline_mode_gets_hash_provider() {
        let mut config = Config::new("/tmp/p");
        config.offline_mode = true;
        let provider = create_embedding_provider(&config);
        assert_eq!(provider.name(), "hash");
    }

    #[test]
    fn test_identity_format() {
        let provider = HashEmbeddingProvider::new();
        assert_eq!(provider.identity(), "hash/fnv-256");
    }
}
