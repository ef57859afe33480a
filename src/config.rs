// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Engine configuration.
//!
//! The engine takes a fully-formed [`Config`] struct; discovering and merging
//! configuration files is the embedding application's concern.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shadow::ShadowMode;

/// Name of the hidden state directory under the project root.
pub const HIDDEN_DIR: &str = ".codescout";

/// Default query cache TTL in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 120;

/// Default byte threshold above which chunk contents are truncated.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// MCP exposure profile.
///
/// Controls how many tools the outer MCP layer exposes; the engine behaves
/// identically across profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpProfile {
    UltraLite,
    Minimal,
    Lite,
    Standard,
    Full,
}

impl McpProfile {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ultra_lite" => Some(Self::UltraLite),
            "minimal" => Some(Self::Minimal),
            "lite" => Some(Self::Lite),
            "standard" => Some(Self::Standard),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

impl Default for McpProfile {
    fn default() -> Self {
        Self::Standard
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Anchor for all relative paths.
    pub project_root: PathBuf,
    /// MCP exposure profile (no effect on engine behavior).
    #[serde(default)]
    pub mcp_profile: McpProfile,
    /// Extra directory globs pruned during indexing.
    #[serde(default)]
    pub verification_excludes: Vec<String>,
    /// TTL for the retriever's query cache, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Defer vector store initialization until first retrieval.
    #[serde(default)]
    pub lazy_load_vector_store: bool,
    /// Enable fuzzy query matching against recently cached queries.
    #[serde(default)]
    pub semantic_cache_enabled: bool,
    /// Cosine threshold for the semantic cache, in `[0, 1]`.
    #[serde(default = "default_semantic_cache_threshold")]
    pub semantic_cache_threshold: f32,
    /// Initial shadow-mode gating policy.
    #[serde(default)]
    pub shadow_mode: ShadowMode,
    /// Forbid all network calls; retrieval fails cleanly if the vector store
    /// needs network.
    #[serde(default)]
    pub offline_mode: bool,
    /// Byte threshold above which parsed chunk contents are truncated.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Index `__init__.py` files too.
    #[serde(default)]
    pub include_init_files: bool,
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_semantic_cache_threshold() -> f32 {
    0.95
}

fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

impl Config {
    /// Create a config with defaults for the given project root.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            mcp_profile: McpProfile::default(),
            verification_excludes: Vec::new(),
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECS,
            lazy_load_vector_store: false,
            semantic_cache_enabled: false,
            semantic_cache_threshold: default_semantic_cache_threshold(),
            shadow_mode: ShadowMode::default(),
            offline_mode: false,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            include_init_files: false,
        }
    }

    /// Hidden state directory under the project root.
    pub fn hidden_dir(&self) -> PathBuf {
        self.project_root.join(HIDDEN_DIR)
    }

    /// Directory holding persisted engine state.
    pub fn state_dir(&self) -> PathBuf {
        self.hidden_dir().join("state")
    }

    /// Directory holding caches.
    pub fn cache_dir(&self) -> PathBuf {
        self.hidden_dir().join("cache")
    }

    /// Directory owned by the local vector store.
    pub fn rag_dir(&self) -> PathBuf {
        self.hidden_dir().join("rag")
    }

    pub fn index_state_path(&self) -> PathBuf {
        self.state_dir().join("index_state.json")
    }

    pub fn shadow_mode_path(&self) -> PathBuf {
        self.state_dir().join("shadow_mode")
    }

    pub fn pending_approval_path(&self) -> PathBuf {
        self.state_dir().join("pending_approval.json")
    }

    pub fn verification_cache_path(&self) -> PathBuf {
        self.cache_dir().join("verification.json")
    }
}

/// Normalize a path relative to the project root to a forward-slash string.
///
/// Paths outside the root are returned as-is (forward-slashed); comparisons
/// across the engine are string-exact on this form.
pub fn normalize_rel_path(project_root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(project_root).unwrap_or(path);
    let s = rel.to_string_lossy();
    if s.contains('\\') {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}
