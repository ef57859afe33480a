// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-file bookkeeping for incremental reindexing.
//!
//! The store persists one [`FileRecord`] per indexed file: its content hash
//! and the chunk ids currently present in the vector store for it. Every
//! mutation rewrites the backing JSON file atomically, so readers never see a
//! partial record set and a crashed writer leaves at most a stale temp file
//! that is cleared on the next open.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::persist;
use crate::types::ChunkId;

/// Bookkeeping row for one indexed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileRecord {
    /// Forward-slash path relative to the project root.
    pub rel_path: String,
    /// SHA-256 hex digest of the file bytes at index time.
    pub content_hash: String,
    /// Exactly the chunk ids present in the vector store for this file.
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Persistent index state store.
pub struct IndexStateStore {
    path: PathBuf,
    records: BTreeMap<String, FileRecord>,
}

impl IndexStateStore {
    /// Open the store, clearing any stale lock from a crashed writer and
    /// quarantining a corrupt state file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        persist::clear_stale_lock(&path);

        let records = persist::read_json_lenient::<Vec<FileRecord>>(&path)
            .unwrap_or_default()
            .into_iter()
            .map(|r| (r.rel_path.clone(), r))
            .collect();

        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, rel_path: &str) -> Option<&FileRecord> {
        self.records.get(rel_path)
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Paths whose stored hash differs from the current one, plus paths not
    /// present in the store at all.
    pub fn changed_files(&self, current: &HashMap<String, String>) -> BTreeSet<String> {
        current
            .iter()
            .filter(|(path, hash)| {
                self.records
                    .get(*path)
                    .map(|r| &r.content_hash != *hash)
                    .unwrap_or(true)
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Stored paths that no longer exist in the walk.
    pub fn stale_files(&self, current: &HashSet<String>) -> BTreeSet<String> {
        self.records
            .keys()
            .filter(|path| !current.contains(*path))
            .cloned()
            .collect()
    }

    /// Upsert a record and persist the full record set atomically.
    pub fn record(
        &mut self,
        rel_path: &str,
        content_hash: &str,
        chunk_ids: Vec<ChunkId>,
    ) -> Result<(), StateError> {
        self.records.insert(
            rel_path.to_string(),
            FileRecord {
                rel_path: rel_path.to_string(),
                content_hash: content_hash.to_string(),
                chunk_ids,
                indexed_at: Some(Utc::now()),
            },
        );
        self.save()
    }

    /// Remove a record, returning the chunk ids it held.
    pub fn forget(&mut self, rel_path: &str) -> Result<Vec<ChunkId>, StateError> {
        let ids = self
            .records
            .remove(rel_path)
            .map(|r| r.chunk_ids)
            .unwrap_or_default();
        self.save()?;
        Ok(ids)
    }

    /// Drop every record (force rebuild).
    pub fn reset(&mut self) -> Result<(), StateError> {
        self.records.clear();
        self.save()
    }

    fn save(&self) -> Result<(), StateError> {
        let rows: Vec<&FileRecord> = self.records.values().collect();
        persist::write_json_atomic(&self.path, &rows)
    }
}
