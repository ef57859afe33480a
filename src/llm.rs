// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Consumed LLM interface.
//!
//! The engine itself never calls a language model; the agent layer that wraps
//! it does. This module only defines the capability the engine expects to be
//! handed, so embedders share one error taxonomy.

use serde::{Deserialize, Serialize};

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: serde_json::Value,
}

/// Result of a completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
    pub success: bool,
    /// Set when `success` is false.
    pub error: Option<LlmErrorKind>,
}

/// Categorized completion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    RateLimit,
    Timeout,
    Auth,
    Other,
}

impl LlmErrorKind {
    /// Categorize a raw provider error message.
    pub fn categorize(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("rate limit") || lower.contains("429") || lower.contains("quota") {
            Self::RateLimit
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("auth") || lower.contains("401") || lower.contains("api key") {
            Self::Auth
        } else {
            Self::Other
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Timeout)
    }
}

/// Completion capability injected by the embedding application.
pub trait CompletionProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> CompletionResponse;

    fn complete_with_tools(
        &self,
        prompt: &str,
        tools: &[serde_json::Value],
    ) -> CompletionResponse {
        let _ = tools;
        self.complete(prompt)
    }
}
