// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shadow-mode guard: a gating state machine over mutating operations.
//!
//! Every proposed write-side effect is classified into an operation type and
//! severity, then either passed through, decided synchronously by an approval
//! callback, or appended to a persistent approval queue. The guard never
//! executes operations; an approved entry is consumed by the caller.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::persist;

/// Gating policy level, persisted as a one-line file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShadowMode {
    /// Every operation passes.
    Disabled,
    /// High/critical operations and large edits are gated.
    Enabled,
    /// Every mutating operation is gated.
    Strict,
}

impl ShadowMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DISABLED" => Some(Self::Disabled),
            "ENABLED" => Some(Self::Enabled),
            "STRICT" => Some(Self::Strict),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "DISABLED",
            Self::Enabled => "ENABLED",
            Self::Strict => "STRICT",
        }
    }
}

impl Default for ShadowMode {
    fn default() -> Self {
        Self::Enabled
    }
}

/// Risk classification of an intercepted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Kind of mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    WriteFile,
    Delete,
    LargeEdit,
    ConfigChange,
    SensitiveChange,
    ShellCommand,
    ProtectedPath,
}

/// A captured mutating operation awaiting an approval decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PendingOperation {
    pub op_id: String,
    pub op_type: OperationType,
    pub file_path: String,
    pub severity: OperationSeverity,
    pub description: String,
    /// Redacted, truncated payload preview.
    pub preview: String,
    /// `None` while undecided.
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A proposed mutating operation, as intercepted from the agent layer.
#[derive(Debug, Clone, Default)]
pub struct OperationRequest {
    pub name: String,
    pub file_path: Option<String>,
    pub content: Option<String>,
    pub search: Option<String>,
    pub replace: Option<String>,
    pub command: Option<String>,
}

impl OperationRequest {
    pub fn write_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: "write_file".to_string(),
            file_path: Some(path.into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            name: "delete_file".to_string(),
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn search_replace(
        path: impl Into<String>,
        search: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        Self {
            name: "search_replace".to_string(),
            file_path: Some(path.into()),
            search: Some(search.into()),
            replace: Some(replace.into()),
            ..Default::default()
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            name: "exec".to_string(),
            command: Some(command.into()),
            ..Default::default()
        }
    }

    fn payload(&self) -> String {
        if let (Some(search), Some(replace)) = (&self.search, &self.replace) {
            return format!("{}\n---\n{}", search, replace);
        }
        if let Some(content) = &self.content {
            return content.clone();
        }
        self.command.clone().unwrap_or_default()
    }

    fn payload_len(&self) -> usize {
        match (&self.search, &self.replace) {
            (Some(s), Some(r)) => s.len() + r.len(),
            _ => self.content.as_ref().map(|c| c.len()).unwrap_or(0),
        }
    }
}

/// Outcome of [`ShadowGuard::check`].
#[derive(Debug, Clone)]
pub enum Gate {
    /// No gate applies; the caller may proceed.
    Pass,
    /// The approval callback approved synchronously; the caller may proceed.
    Approved(PendingOperation),
    /// The approval callback declined; the operation must not run.
    Denied(PendingOperation),
    /// Queued for out-of-band approval; the operation must not run yet.
    Queued(PendingOperation),
}

impl Gate {
    pub fn may_proceed(&self) -> bool {
        matches!(self, Self::Pass | Self::Approved(_))
    }
}

/// Synchronous approval hook.
pub type ApprovalCallback = Box<dyn Fn(&PendingOperation) -> bool + Send + Sync>;

/// Payload byte threshold for the large-edit classification.
const LARGE_EDIT_BYTES: usize = 1000;

/// Preview truncation length, in characters.
const PREVIEW_MAX_CHARS: usize = 500;

static SECRETS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(password|passwd|pwd|secret|api[_-]?key|access[_-]?key|auth[_-]?token|token|authorization|bearer)\s*[=:]\s*\S+"#,
    )
    .expect("secrets regex is valid")
});

static SENSITIVE_NAMES: &[&str] = &[
    ".env",
    "secret",
    "api_key",
    "apikey",
    "password",
    "credential",
];

static CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml", "toml", "ini", "cfg", "conf"];

struct GuardState {
    mode: ShadowMode,
    queue: Vec<PendingOperation>,
    counter: u64,
}

/// The gating state machine.
pub struct ShadowGuard {
    state: Mutex<GuardState>,
    pending_path: PathBuf,
    mode_path: PathBuf,
    approval_callback: Option<ApprovalCallback>,
}

impl ShadowGuard {
    /// Open the guard, re-reading persisted mode and queue. Invalid persisted
    /// values fall back to `default_mode` without error.
    pub fn open(
        pending_path: impl Into<PathBuf>,
        mode_path: impl Into<PathBuf>,
        default_mode: ShadowMode,
    ) -> Self {
        let pending_path = pending_path.into();
        let mode_path = mode_path.into();
        persist::clear_stale_lock(&pending_path);

        let mode = std::fs::read_to_string(&mode_path)
            .ok()
            .and_then(|raw| ShadowMode::parse(&raw))
            .unwrap_or(default_mode);

        let queue: Vec<PendingOperation> =
            persist::read_json_lenient(&pending_path).unwrap_or_default();
        let counter = queue
            .iter()
            .filter_map(|op| op.op_id.strip_prefix("op_")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        Self {
            state: Mutex::new(GuardState {
                mode,
                queue,
                counter,
            }),
            pending_path,
            mode_path,
            approval_callback: None,
        }
    }

    /// Install a synchronous approval callback. A panicking callback is
    /// treated as "queue".
    pub fn with_approval_callback(mut self, callback: ApprovalCallback) -> Self {
        self.approval_callback = Some(callback);
        self
    }

    pub fn mode(&self) -> ShadowMode {
        self.lock().mode
    }

    /// Change the gating policy and persist it.
    pub fn set_mode(&self, mode: ShadowMode) {
        self.lock().mode = mode;
        if let Some(parent) = self.mode_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.mode_path, format!("{}\n", mode.as_str())) {
            tracing::warn!("Failed to persist shadow mode: {}", e);
        }
    }

    /// Decide whether a proposed operation may proceed.
    pub fn check(&self, request: &OperationRequest) -> Gate {
        let (op_type, severity) = classify(request);

        let gated = {
            let state = self.lock();
            match state.mode {
                ShadowMode::Disabled => false,
                ShadowMode::Enabled => {
                    severity >= OperationSeverity::High || op_type == OperationType::LargeEdit
                }
                ShadowMode::Strict => true,
            }
        };
        if !gated {
            return Gate::Pass;
        }

        let mut pending = self.render(request, op_type, severity);

        if let Some(callback) = &self.approval_callback {
            match catch_unwind(AssertUnwindSafe(|| callback(&pending))) {
                Ok(true) => {
                    pending.approved = Some(true);
                    return Gate::Approved(pending);
                }
                Ok(false) => {
                    pending.approved = Some(false);
                    return Gate::Denied(pending);
                }
                Err(_) => {
                    tracing::warn!("Approval callback panicked; queueing {}", pending.op_id);
                }
            }
        }

        let mut state = self.lock();
        state.queue.push(pending.clone());
        self.save_queue(&state.queue);
        Gate::Queued(pending)
    }

    /// Approve a queued operation. Idempotent; the entry stays queued with
    /// `approved = true` until the caller consumes it.
    pub fn approve(&self, op_id: &str, note: Option<&str>) -> bool {
        let mut state = self.lock();
        let Some(op) = state.queue.iter_mut().find(|op| op.op_id == op_id) else {
            return false;
        };
        op.approved = Some(true);
        op.note = note.map(|n| n.to_string());
        self.save_queue(&state.queue);
        true
    }

    /// Reject an operation and drop it from the active queue.
    pub fn reject(&self, op_id: &str, note: Option<&str>) -> bool {
        let mut state = self.lock();
        let Some(index) = state.queue.iter().position(|op| op.op_id == op_id) else {
            return false;
        };
        let mut op = state.queue.remove(index);
        op.approved = Some(false);
        op.note = note.map(|n| n.to_string());
        self.save_queue(&state.queue);
        tracing::info!("Rejected operation {} on {}", op.op_id, op.file_path);
        true
    }

    /// Entries still awaiting a decision.
    pub fn pending(&self) -> Vec<PendingOperation> {
        self.lock()
            .queue
            .iter()
            .filter(|op| op.approved.is_none())
            .cloned()
            .collect()
    }

    /// Approval status of an entry: `None` when unknown or undecided.
    pub fn is_approved(&self, op_id: &str) -> Option<bool> {
        self.lock()
            .queue
            .iter()
            .find(|op| op.op_id == op_id)
            .and_then(|op| op.approved)
    }

    /// Drop every queued entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let count = state.queue.len();
        state.queue.clear();
        self.save_queue(&state.queue);
        count
    }

    fn render(
        &self,
        request: &OperationRequest,
        op_type: OperationType,
        severity: OperationSeverity,
    ) -> PendingOperation {
        let mut state = self.lock();
        state.counter += 1;
        let op_id = format!("op_{}", state.counter);
        drop(state);

        let file_path = request.file_path.clone().unwrap_or_default();
        let description = match op_type {
            OperationType::ShellCommand => format!(
                "{}: {}",
                request.name,
                redact(request.command.as_deref().unwrap_or(""))
            ),
            _ => format!("{} -> {}", request.name, file_path),
        };

        PendingOperation {
            op_id,
            op_type,
            file_path,
            severity,
            description,
            preview: safe_preview(&request.payload(), PREVIEW_MAX_CHARS),
            approved: None,
            note: None,
            created_at: Utc::now(),
        }
    }

    fn save_queue(&self, queue: &[PendingOperation]) {
        if let Err(e) = persist::write_json_atomic(&self.pending_path, &queue) {
            tracing::warn!("Failed to persist approval queue: {}", e);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Deterministic, order-sensitive operation classification.
fn classify(request: &OperationRequest) -> (OperationType, OperationSeverity) {
    let name = request.name.to_ascii_lowercase();
    let path = request.file_path.as_deref().unwrap_or("");

    if name.contains("delete") || name.contains("remove") {
        return (OperationType::Delete, OperationSeverity::High);
    }
    if !path.is_empty() && is_protected_path(path) {
        return (OperationType::ProtectedPath, OperationSeverity::Critical);
    }
    if !path.is_empty() && is_sensitive_file(path) {
        return (OperationType::SensitiveChange, OperationSeverity::Critical);
    }
    if !path.is_empty() && is_config_file(path) {
        return (OperationType::ConfigChange, OperationSeverity::High);
    }
    if name.contains("exec") || name.contains("shell") || name.contains("command") {
        return (OperationType::ShellCommand, OperationSeverity::High);
    }
    if request.payload_len() > LARGE_EDIT_BYTES {
        return (OperationType::LargeEdit, OperationSeverity::Medium);
    }
    (OperationType::WriteFile, OperationSeverity::Low)
}

/// System and VCS paths no agent write should touch.
pub fn is_protected_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let expanded = if let Some(rest) = normalized.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => format!("{}/{}", home.to_string_lossy(), rest),
            None => normalized.clone(),
        }
    } else {
        normalized.clone()
    };

    if normalized.starts_with("~/.ssh/") || expanded.contains("/.ssh/") {
        return true;
    }
    if expanded.starts_with("/etc/") || expanded.starts_with("/boot/") || expanded.starts_with("/sys/") {
        return true;
    }
    normalized.starts_with(".git/") || normalized.contains("/.git/")
}

/// File names that suggest credentials or secrets.
pub fn is_sensitive_file(path: &str) -> bool {
    let name = path
        .replace('\\', "/")
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_ascii_lowercase();
    SENSITIVE_NAMES.iter().any(|marker| name.contains(marker))
}

/// Configuration files: YAML/TOML-class extensions, top-level JSON, and
/// project manifests.
pub fn is_config_file(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or(&normalized).to_ascii_lowercase();

    if name.starts_with("pyproject.") || name == "setup.py" || name == "setup.cfg" {
        return true;
    }
    let ext = name.rsplit('.').next().unwrap_or("");
    if CONFIG_EXTENSIONS.contains(&ext) {
        return true;
    }
    // JSON counts only at the repository top level.
    ext == "json" && !normalized.contains('/')
}

/// Replace secret-looking spans with `[REDACTED]`.
pub fn redact(text: &str) -> String {
    SECRETS_RE.replace_all(text, "[REDACTED]").into_owned()
}

/// Redact, then truncate to `max_chars` characters.
pub fn safe_preview(text: &str, max_chars: usize) -> String {
    let redacted = redact(text);
    match redacted.char_indices().nth(max_chars) {
        Some((idx, _)) => redacted[..idx].to_string(),
        None => redacted,
    }
}
