// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File-hash-keyed verification cache.
//!
//! The external verifier layer records a verdict per file content hash so an
//! unchanged file is never re-verified. The engine only owns the persistence.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::persist;

/// One cached verification verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationEntry {
    pub passed: bool,
    pub level: String,
    pub checked_at: DateTime<Utc>,
}

/// Persistent verification cache, keyed by file content hash.
pub struct VerificationCache {
    path: PathBuf,
    entries: BTreeMap<String, VerificationEntry>,
}

impl VerificationCache {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        persist::clear_stale_lock(&path);
        let entries = persist::read_json_lenient(&path).unwrap_or_default();
        Self { path, entries }
    }

    pub fn get(&self, content_hash: &str) -> Option<&VerificationEntry> {
        self.entries.get(content_hash)
    }

    pub fn record(
        &mut self,
        content_hash: &str,
        passed: bool,
        level: &str,
    ) -> Result<(), StateError> {
        self.entries.insert(
            content_hash.to_string(),
            VerificationEntry {
                passed,
                level: level.to_string(),
                checked_at: Utc::now(),
            },
        );
        persist::write_json_atomic(&self.path, &self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
