// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the codescout retrieval engine.
//!
//! This module provides strongly-typed errors for different parts of the engine,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error
//! propagation. Errors are tagged values, not control flow: `NotFound` conditions
//! surface as empty results or `false` at the public API, never as an `Err`.

use thiserror::Error;

/// Errors that can occur while parsing or indexing source files.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to walk project: {0}")]
    WalkFailed(String),

    #[error("Failed to read {path}: {message}")]
    ReadFailed { path: String, message: String },

    #[error("Parse failed for {0}")]
    ParseFailed(String),

    #[error("Index build cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Errors from the vector store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding identity mismatch: collection built with {stored}, current provider is {current}")]
    IdentityMismatch { stored: String, current: String },

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl StoreError {
    /// Check if this error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::Unavailable(_))
            || matches!(self, Self::Embedding(e) if e.is_transient())
    }
}

/// Errors from embedding providers.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Offline mode forbids network call to {0}")]
    OfflineMode(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),
}

impl EmbeddingError {
    /// Check if this error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::RateLimited(_))
    }
}

/// Errors from persisted state (index state, pending queue, caches).
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Corrupt state file {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("Failed to persist {path}: {message}")]
    PersistFailed { path: String, message: String },

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Errors surfaced by the retriever.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Index not built")]
    NotReady,

    #[error("Deadline expired")]
    DeadlineExpired,
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_transient() {
        assert!(StoreError::ConnectionFailed("refused".to_string()).is_transient());
        assert!(StoreError::Unavailable("down".to_string()).is_transient());
        assert!(!StoreError::QueryFailed("bad filter".to_string()).is_transient());
        assert!(
            StoreError::Embedding(EmbeddingError::RateLimited("wait".to_string())).is_transient()
        );
    }

    #[test]
    fn test_embedding_error_transient() {
        assert!(EmbeddingError::NetworkError("timeout".to_string()).is_transient());
        assert!(!EmbeddingError::AuthError("bad key".to_string()).is_transient());
        assert!(!EmbeddingError::OfflineMode("ollama".to_string()).is_transient());
    }

    #[test]
    fn test_index_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: IndexError = io_err.into();
        assert!(matches!(err, IndexError::IoError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::IdentityMismatch {
            stored: "ollama/nomic-embed-text".to_string(),
            current: "hash/256".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("ollama/nomic-embed-text"));
        assert!(display.contains("hash/256"));
    }
}
