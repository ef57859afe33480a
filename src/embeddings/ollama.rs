// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ollama embedding provider.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

use super::EmbeddingProvider;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Ollama embedding provider over the local HTTP API.
pub struct OllamaEmbeddingProvider {
    client: Client,
    model: String,
    base_url: String,
    dimensions: usize,
}

impl OllamaEmbeddingProvider {
    const DEFAULT_DIMENSIONS: usize = 768;

    pub fn new(model: &str, base_url: Option<&str>) -> Self {
        let base_url = base_url
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/')
            .to_string();

        // Known dimensions for common models.
        let dimensions = match model {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            "snowflake-arctic-embed" => 1024,
            _ => Self::DEFAULT_DIMENSIONS,
        };

        Self {
            client: Client::new(),
            model: model.to_string(),
            base_url,
            dimensions,
        }
    }

    /// Check if the Ollama server answers at all.
    pub fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .map_err(|e| EmbeddingError::NetworkError(format!("Ollama request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Unavailable(format!(
                "Ollama returned {}: is model '{}' pulled?",
                status, self.model
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbeddingError::ParseError(format!("Bad Ollama response: {}", e)))?;

        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::ParseError(
                "Ollama returned an empty embedding".to_string(),
            ));
        }
        Ok(parsed.embedding)
    }
}
