// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! codescout - dependency-aware semantic code retrieval for AI coding agents.
//!
//! Given a natural-language query or a concrete code location, the engine
//! returns ranked code fragments together with their structural neighbors
//! (callers, callees, sibling methods), and gates the agent's write-side
//! effects behind a shadow-mode approval queue.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core type definitions (ChunkId, CodeChunk, RetrievalResult, ...)
//! - [`error`] - Error types and result aliases
//! - [`config`] - Engine configuration and persisted-state layout
//! - [`parser`] - Tree-sitter chunk extraction with a regex fallback
//! - [`indexer`] - Deterministic project walk producing chunks
//! - [`state`] - Per-file hash bookkeeping for incremental reindexing
//! - [`graph`] - Name-resolved dependency graph over chunks
//! - [`store`] - Vector store trait and the SQLite-backed local store
//! - [`embeddings`] - Embedding providers (Ollama, OpenAI, offline hashing)
//! - [`retriever`] - Hybrid retrieval, modification context, index builds
//! - [`session`] - Session context biasing retrieval ranking
//! - [`cache`] - TTL query cache with optional semantic matching
//! - [`shadow`] - Shadow-mode guard over mutating operations
//! - [`telemetry`] - Metrics collection (gated by the `telemetry` feature)
//! - [`verify_cache`] - File-hash-keyed verification cache
//! - [`llm`] - Consumed LLM interface definition (agent layer)
//!
//! # Example
//!
//! ```rust,no_run
//! use codescout::{Config, Engine};
//! use codescout::retriever::RetrieveOptions;
//!
//! let engine = Engine::open(Config::new("/path/to/project"))?;
//! engine.retriever().build_index(false)?;
//!
//! let results = engine
//!     .retriever()
//!     .retrieve("authentication error handling", &RetrieveOptions::default());
//! for result in results {
//!     println!(
//!         "{}:{} {} ({:.2})",
//!         result.chunk.file_path, result.chunk.start_line, result.chunk.name, result.score
//!     );
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod llm;
pub mod parser;
pub mod persist;
pub mod retriever;
pub mod session;
pub mod shadow;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod verify_cache;

pub use config::{Config, McpProfile};
pub use error::Result;
pub use retriever::{IndexStatus, ModificationContext, RetrieveOptions, Retriever};
pub use session::{SessionContext, TaskType};
pub use shadow::{Gate, OperationRequest, PendingOperation, ShadowGuard, ShadowMode};
pub use types::{ChunkId, ChunkType, CodeChunk, RetrievalMethod, RetrievalResult};

use std::sync::Arc;

/// Application context owning the engine's long-lived components.
///
/// One engine per project root: the retriever owns the chunk map, graph and
/// query cache; the guard owns the approval queue and persisted mode. Handed
/// to each operation instead of living in globals, with thin accessors as the
/// test seam.
pub struct Engine {
    retriever: Arc<Retriever>,
    guard: ShadowGuard,
}

impl Engine {
    /// Open an engine for the configured project root.
    pub fn open(config: Config) -> Result<Self> {
        let guard = ShadowGuard::open(
            config.pending_approval_path(),
            config.shadow_mode_path(),
            config.shadow_mode,
        );
        let retriever = Arc::new(Retriever::open(config)?);
        Ok(Self { retriever, guard })
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub fn guard(&self) -> &ShadowGuard {
        &self.guard
    }
}
