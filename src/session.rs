// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session context: per-process metadata about the current task that biases
//! retrieval ranking. One value per engine, set and cleared explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of task the agent is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Debugging,
    Feature,
    Refactor,
    Review,
    General,
}

impl TaskType {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "debugging" => Self::Debugging,
            "feature" => Self::Feature,
            "refactor" | "refactoring" => Self::Refactor,
            "review" => Self::Review,
            _ => Self::General,
        }
    }

    /// Query tokens associated with this task type. Each match between this
    /// set and the query tokens adds a ranking boost.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Debugging => &["error", "bug", "except", "fail", "traceback"],
            Self::Refactor => &["rename", "extract", "move"],
            Self::Feature => &["add", "new", "implement"],
            Self::Review => &["lint", "style", "doc"],
            Self::General => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debugging => "debugging",
            Self::Feature => "feature",
            Self::Refactor => "refactor",
            Self::Review => "review",
            Self::General => "general",
        }
    }
}

/// Current task metadata used for session-aware re-ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub task_type: TaskType,
    /// Substrings matched against chunk file paths.
    pub focus_files: Vec<String>,
    pub keywords: Vec<String>,
    pub set_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            focus_files: Vec::new(),
            keywords: Vec::new(),
            set_at: Utc::now(),
        }
    }

    pub fn with_focus_files(mut self, focus_files: Vec<String>) -> Self {
        self.focus_files = focus_files.into_iter().map(|f| f.replace('\\', "/")).collect();
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Stable fingerprint folded into query-cache keys so a context change
    /// never serves stale rankings.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.task_type.as_str().as_bytes());
        for f in &self.focus_files {
            hasher.update(b"|");
            hasher.update(f.as_bytes());
        }
        for k in &self.keywords {
            hasher.update(b";");
            hasher.update(k.as_bytes());
        }
        let hash = format!("{:x}", hasher.finalize());
        hash[..12].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_parse() {
        assert_eq!(TaskType::parse("debugging"), TaskType::Debugging);
        assert_eq!(TaskType::parse("DEBUG"), TaskType::Debugging);
        assert_eq!(TaskType::parse("refactoring"), TaskType::Refactor);
        assert_eq!(TaskType::parse("anything else"), TaskType::General);
    }

    #[test]
    fn test_keyword_table() {
        assert!(TaskType::Debugging.keywords().contains(&"traceback"));
        assert!(TaskType::Refactor.keywords().contains(&"rename"));
        assert!(TaskType::Feature.keywords().contains(&"implement"));
        assert!(TaskType::Review.keywords().contains(&"lint"));
        assert!(TaskType::General.keywords().is_empty());
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = SessionContext::new(TaskType::Debugging)
            .with_focus_files(vec!["src/auth.py".to_string()]);
        let b = SessionContext::new(TaskType::Debugging)
            .with_focus_files(vec!["src/billing.py".to_string()]);
        let c = SessionContext::new(TaskType::Feature)
            .with_focus_files(vec!["src/auth.py".to_string()]);

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint(), a.fingerprint());
    }

    #[test]
    fn test_focus_files_normalized() {
        let ctx = SessionContext::new(TaskType::General)
            .with_focus_files(vec!["src\\auth.py".to_string()]);
        assert_eq!(ctx.focus_files, vec!["src/auth.py".to_string()]);
    }
}
