// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deterministic feature-hashing embedding provider.
//!
//! Tokenizes text into lowercase identifier fragments and hashes each token
//! into a fixed-dimension bag-of-words vector, L2-normalized. Needs no
//! network, so it backs `offline_mode` and the test suite. Vectors capture
//! token overlap rather than meaning, which is enough for code retrieval over
//! names, signatures and docstrings.

use crate::error::EmbeddingError;

use super::EmbeddingProvider;

const DIMENSIONS: usize = 256;

/// Offline feature-hashing embedder.
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            dimensions: DIMENSIONS,
        }
    }

    fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(|t| t.to_ascii_lowercase())
    }

    /// FNV-1a, stable across platforms and runs.
    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &str {
        "hash"
    }

    fn model(&self) -> &str {
        "fnv-256"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in Self::tokenize(text) {
            let hash = Self::fnv1a(&token);
            let bucket = (hash % self.dimensions as u64) as usize;
            // A second hash bit supplies the sign, spreading collisions.
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}
