// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistence helpers for the engine's JSON state files.
//!
//! Every persisted JSON file is UTF-8, 4-space indented, and written with a
//! temp-then-rename swap so readers never observe a partial write. Corrupt
//! files are quarantined with a `.bak` suffix and treated as empty; recovery
//! is manual.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StateError;

/// Serialize a value as 4-space-indented JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| StateError::PersistFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    buf.push(b'\n');

    let tmp = tmp_path(path);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StateError::PersistFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        }
    })?;

    Ok(())
}

/// Read a JSON state file, treating a missing file as `None`.
///
/// A file that exists but cannot be parsed is renamed `<name>.bak` and
/// reported as `None` with a single diagnostic log line.
pub fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            quarantine(path, &e.to_string());
            None
        }
    }
}

/// Rename a corrupt state file out of the way with a `.bak` suffix.
pub fn quarantine(path: &Path, reason: &str) {
    let bak = bak_path(path);
    tracing::warn!(
        "Corrupt state file {} ({}), renaming to {}",
        path.display(),
        reason,
        bak.display()
    );
    if let Err(e) = std::fs::rename(path, &bak) {
        tracing::warn!("Failed to quarantine {}: {}", path.display(), e);
    }
}

/// Detect and clear a stale lock left behind by a crashed writer.
///
/// Returns `true` if a stale temp file was removed.
pub fn clear_stale_lock(path: &Path) -> bool {
    let tmp = tmp_path(path);
    if tmp.exists() {
        tracing::warn!("Clearing stale write lock {}", tmp.display());
        return std::fs::remove_file(&tmp).is_ok();
    }
    false
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn bak_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}
