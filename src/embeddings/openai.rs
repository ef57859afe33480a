// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAI embedding provider.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

use super::EmbeddingProvider;

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const API_URL: &str = "https://api.openai.com/v1/embeddings";

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embedding provider.
pub struct OpenAIEmbeddingProvider {
    client: Client,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl OpenAIEmbeddingProvider {
    pub fn new(model: Option<&str>) -> Self {
        let model = model.unwrap_or(DEFAULT_MODEL).to_string();
        let dimensions = match model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 1536,
        };

        Self {
            client: Client::new(),
            model,
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            dimensions,
        }
    }
}

impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::AuthError("OPENAI_API_KEY not set".to_string()))?;

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .map_err(|e| EmbeddingError::NetworkError(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EmbeddingError::RateLimited(
                "OpenAI embeddings rate limited".to_string(),
            ));
        }
        if status.as_u16() == 401 {
            return Err(EmbeddingError::AuthError(
                "OpenAI rejected the API key".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(EmbeddingError::Unavailable(format!(
                "OpenAI returned {}",
                status
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbeddingError::ParseError(format!("Bad OpenAI response: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::ParseError("OpenAI returned no embedding".to_string()))
    }
}
