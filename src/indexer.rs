// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Project walker producing [`CodeChunk`] values.
//!
//! Walks the project depth-first in deterministic order, prunes ignored
//! directories, dispatches files to the chunk parser by extension, and emits
//! chunks with stable ids and forward-slash relative paths. Unreadable and
//! non-UTF-8 files are skipped and counted, never fatal.

use std::path::{Path, PathBuf};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::{normalize_rel_path, Config, HIDDEN_DIR};
use crate::error::IndexError;
use crate::parser::{ChunkParser, Language};
#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;
use crate::types::{ChunkId, ChunkType, CodeChunk, IndexStats};

/// Directories pruned at walk time.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    "htmlcov",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    "dist",
    "build",
    HIDDEN_DIR,
];

/// A source file discovered by the walk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub abs_path: PathBuf,
    /// Forward-slash path relative to the project root.
    pub rel_path: String,
}

/// Parsed chunks for one file, with its content hash.
#[derive(Debug, Clone)]
pub struct FileChunks {
    pub rel_path: String,
    pub content_hash: String,
    pub chunks: Vec<CodeChunk>,
}

/// Walks the project and produces chunks for every relevant file.
pub struct CodeIndexer {
    project_root: PathBuf,
    extra_excludes: GlobSet,
    include_init_files: bool,
    max_file_bytes: u64,
    parser: ChunkParser,
    stats: IndexStats,
}

impl CodeIndexer {
    pub fn new(config: &Config) -> Result<Self, IndexError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.verification_excludes {
            let glob = Glob::new(pattern)
                .map_err(|e| IndexError::WalkFailed(format!("invalid exclude glob '{}': {}", pattern, e)))?;
            builder.add(glob);
        }
        let extra_excludes = builder
            .build()
            .map_err(|e| IndexError::WalkFailed(format!("failed to build excludes: {}", e)))?;

        Ok(Self {
            project_root: config.project_root.clone(),
            extra_excludes,
            include_init_files: config.include_init_files,
            max_file_bytes: config.max_file_bytes,
            parser: ChunkParser::new(),
            stats: IndexStats::default(),
        })
    }

    /// Indexing statistics accumulated since the last reset.
    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = IndexStats::default();
    }

    /// Collect every indexable file, sorted depth-first by file name.
    pub fn collect_files(&self) -> Result<Vec<SourceFile>, IndexError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let mut files = Vec::new();

        let walker = WalkDir::new(&self.project_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                if entry.file_type().is_dir() {
                    return !self.should_skip_dir(entry.path());
                }
                true
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if entry.path_is_symlink() && self.escapes_root(path) {
                continue;
            }
            if !self.is_indexable(path) {
                continue;
            }
            files.push(SourceFile {
                abs_path: path.to_path_buf(),
                rel_path: normalize_rel_path(&self.project_root, path),
            });
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("indexer.collect_files", start.elapsed());

        Ok(files)
    }

    /// Parse one file into chunks. Returns `None` when the file is skipped
    /// (unreadable, non-UTF-8, or a syntax failure).
    pub fn index_file(&mut self, file: &SourceFile) -> Option<FileChunks> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.stats.total_files += 1;

        let bytes = match std::fs::read(&file.abs_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", file.rel_path, e);
                self.stats.skipped_files += 1;
                return None;
            }
        };
        let content_hash = hash_bytes(&bytes);

        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(_) => {
                tracing::warn!("Skipping non-UTF-8 file {}", file.rel_path);
                self.stats.skipped_files += 1;
                return None;
            }
        };

        let oversized = content.len() as u64 > self.max_file_bytes;
        let parsed = self.parser.parse_file(&file.abs_path, &content);
        if parsed.is_empty() && !content.trim().is_empty() {
            self.stats.skipped_files += 1;
            return None;
        }

        let mut chunks = Vec::with_capacity(parsed.len());
        for chunk in parsed {
            match chunk.chunk_type {
                ChunkType::Function => self.stats.functions += 1,
                ChunkType::Class => self.stats.classes += 1,
                ChunkType::Method => self.stats.methods += 1,
                ChunkType::Script => self.stats.script_chunks += 1,
                _ => {}
            }
            self.stats.total_chunks += 1;

            // The configured threshold bounds the truncated size as well.
            let content = if oversized {
                truncate_at_line_boundary(&chunk.content, self.max_file_bytes as usize)
            } else {
                chunk.content
            };

            chunks.push(CodeChunk {
                chunk_id: ChunkId::derive(&file.rel_path, &chunk.qualified_name),
                file_path: file.rel_path.clone(),
                chunk_type: chunk.chunk_type,
                name: chunk.name,
                qualified_name: chunk.qualified_name,
                content,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                dependencies: chunk.dependencies,
                parent: chunk.parent,
                signature: chunk.signature,
                docstring: chunk.docstring,
            });
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("indexer.index_file", start.elapsed());

        Some(FileChunks {
            rel_path: file.rel_path.clone(),
            content_hash,
            chunks,
        })
    }

    /// Walk and parse the whole project.
    pub fn index_project(&mut self) -> Result<Vec<FileChunks>, IndexError> {
        self.reset_stats();
        let files = self.collect_files()?;
        let mut out = Vec::with_capacity(files.len());
        for file in &files {
            if let Some(chunks) = self.index_file(file) {
                out.push(chunks);
            }
        }
        Ok(out)
    }

    fn should_skip_dir(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if IGNORED_DIRS.contains(&name.as_ref()) || name.ends_with(".egg-info") {
            return true;
        }
        let rel = normalize_rel_path(&self.project_root, path);
        self.extra_excludes.is_match(Path::new(&rel))
    }

    fn is_indexable(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if Language::from_extension(ext).is_none() {
            return false;
        }
        if !self.include_init_files
            && path.file_name().and_then(|n| n.to_str()) == Some("__init__.py")
        {
            return false;
        }
        true
    }

    /// True when a symlinked file resolves outside the project root.
    fn escapes_root(&self, path: &Path) -> bool {
        let Ok(target) = std::fs::canonicalize(path) else {
            return true;
        };
        let root = std::fs::canonicalize(&self.project_root)
            .unwrap_or_else(|_| self.project_root.clone());
        !target.starts_with(&root)
    }
}

/// SHA-256 hex digest of file bytes, used for change detection.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Keep whole lines while the running total stays within `max_bytes`.
fn truncate_at_line_boundary(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let mut kept = 0usize;
    let mut out: Vec<&str> = Vec::new();
    for line in content.lines() {
        let cost = line.len() + 1;
        if kept + cost > max_bytes {
            break;
        }
        kept += cost;
        out.push(line);
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn indexer_for(root: &Path) -> CodeIndexer {
        CodeIndexer::new(&Config::new(root)).unwrap()
    }

    #[test]
    fn test_walk_collects_supported_files_sorted() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/b.py", "x = 1\n");
        write(dir.path(), "src/a.py", "y = 2\n");
        write(dir.path(), "README.md", "# readme\n");
        write(dir.path(), "notes.txt", "hello\n");

        let indexer = indexer_for(dir.path());
        let files = indexer.collect_files().unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.py", "src/b.py"]);
    }

    #[test]
    fn test_ignored_dirs_pruned() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/main.py", "x = 1\n");
        write(dir.path(), "node_modules/pkg/index.js", "module.exports = 1;\n");
        write(dir.path(), ".git/hooks/pre-commit.py", "x = 1\n");
        write(dir.path(), "pkg.egg-info/meta.py", "x = 1\n");
        write(dir.path(), ".codescout/state/tmp.py", "x = 1\n");

        let indexer = indexer_for(dir.path());
        let files = indexer.collect_files().unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.py"]);
    }

    #[test]
    fn test_verification_excludes_pruned() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/main.py", "x = 1\n");
        write(dir.path(), "generated/gen.py", "x = 1\n");

        let mut config = Config::new(dir.path());
        config.verification_excludes = vec!["generated".to_string()];
        let indexer = CodeIndexer::new(&config).unwrap();
        let files = indexer.collect_files().unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.py"]);
    }

    #[test]
    fn test_init_files_skipped_by_default() {
        let dir = tempdir().unwrap();
        write(dir.path(), "pkg/__init__.py", "from .core import *\n");
        write(dir.path(), "pkg/core.py", "def f():\n    pass\n");

        let indexer = indexer_for(dir.path());
        let files = indexer.collect_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "pkg/core.py");

        let mut config = Config::new(dir.path());
        config.include_init_files = true;
        let indexer = CodeIndexer::new(&config).unwrap();
        assert_eq!(indexer.collect_files().unwrap().len(), 2);
    }

    #[test]
    fn test_non_utf8_file_skipped_with_counter() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.py"), [0xFF, 0xFE, 0x00, 0x41]).unwrap();
        write(dir.path(), "good.py", "def f():\n    pass\n");

        let mut indexer = indexer_for(dir.path());
        let results = indexer.index_project().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rel_path, "good.py");
        assert_eq!(indexer.stats().skipped_files, 1);
    }

    #[test]
    fn test_chunk_ids_and_forward_slash_paths() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "src/auth.py",
            "def authenticate_user(u, p):\n    return verify_password(p, u.hash)\n",
        );

        let mut indexer = indexer_for(dir.path());
        let results = indexer.index_project().unwrap();
        assert_eq!(results.len(), 1);
        let file = &results[0];
        assert_eq!(file.rel_path, "src/auth.py");
        assert!(!file.content_hash.is_empty());

        let chunk = file
            .chunks
            .iter()
            .find(|c| c.name == "authenticate_user")
            .unwrap();
        assert_eq!(
            chunk.chunk_id,
            ChunkId::derive("src/auth.py", "authenticate_user")
        );
        assert!(chunk.dependencies.contains(&"verify_password".to_string()));
    }

    #[test]
    fn test_oversized_file_truncated_at_line_boundary() {
        let dir = tempdir().unwrap();
        let mut body = String::from("def big():\n");
        for i in 0..2000 {
            body.push_str(&format!("    x{} = \"{}\"\n", i, "v".repeat(40)));
        }
        write(dir.path(), "big.py", &body);

        let mut config = Config::new(dir.path());
        config.max_file_bytes = 1024;
        let mut indexer = CodeIndexer::new(&config).unwrap();
        let results = indexer.index_project().unwrap();
        let chunk = &results[0].chunks[0];

        // The configured threshold bounds the emitted content.
        assert!(chunk.content.len() as u64 <= config.max_file_bytes);
        assert!(chunk.content.ends_with('"'), "must end on a whole line");
        // Spans still describe the real extent in the file.
        assert_eq!(chunk.start_line, 1);
        assert_eq!(chunk.end_line, 2001);
    }

    #[test]
    fn test_empty_project() {
        let dir = tempdir().unwrap();
        let mut indexer = indexer_for(dir.path());
        let results = indexer.index_project().unwrap();
        assert!(results.is_empty());
        assert_eq!(indexer.stats().total_chunks, 0);
    }

    #[test]
    fn test_stats_counts() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "m.py",
            "def f():\n    pass\n\n\nclass C:\n    def m(self):\n        pass\n",
        );
        let mut indexer = indexer_for(dir.path());
        indexer.index_project().unwrap();
        let stats = indexer.stats();
        assert_eq!(stats.functions, 1);
        assert_eq!(stats.classes, 1);
        assert_eq!(stats.methods, 1);
    }
}
