// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Source-file chunk extraction.
//!
//! Turns a source file into an ordered sequence of [`ParsedChunk`] values with
//! structural metadata. Python gets a structured pass that understands module
//! docstrings, import prologues, classes and methods; the other grammar-backed
//! languages get a tree-sitter definition pass; everything else falls back to a
//! line-regex scan.
//!
//! Parsing never fails hard: a file the parser does not support, or one with a
//! syntax error, yields an empty sequence. For identical input bytes the output
//! sequence is byte-identical.

mod deps;
mod fallback;
mod generic;
mod python;

use std::collections::HashMap;
use std::path::Path;

use tree_sitter::Parser;

use crate::types::ChunkType;

/// Language inferred from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    Rust,
    Ruby,
    Php,
}

impl Language {
    /// Fixed extension table; extensions outside it are unsupported.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "py" => Some(Self::Python),
            "js" | "jsx" => Some(Self::JavaScript),
            "ts" | "tsx" => Some(Self::TypeScript),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" => Some(Self::Cpp),
            "rs" => Some(Self::Rust),
            "rb" => Some(Self::Ruby),
            "php" => Some(Self::Php),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Rust => "rust",
            Self::Ruby => "ruby",
            Self::Php => "php",
        }
    }

    fn grammar(&self) -> Option<tree_sitter::Language> {
        match self {
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Self::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Self::C => Some(tree_sitter_c::LANGUAGE.into()),
            Self::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            // No bundled grammar; these take the regex fallback.
            Self::Ruby | Self::Php => None,
        }
    }
}

/// A parsed chunk before it is assigned a file path and chunk id.
#[derive(Debug, Clone)]
pub struct ParsedChunk {
    pub chunk_type: ChunkType,
    pub name: String,
    /// `parent.name` for methods, otherwise equal to `name` (or a positional
    /// marker for script/imports chunks). Combined with the file path to
    /// derive the chunk id.
    pub qualified_name: String,
    pub content: String,
    /// 1-indexed inclusive.
    pub start_line: u32,
    /// 1-indexed inclusive.
    pub end_line: u32,
    pub dependencies: Vec<String>,
    pub parent: Option<String>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
}

/// Chunk parser dispatching on language.
pub struct ChunkParser {
    parsers: HashMap<Language, Parser>,
}

impl ChunkParser {
    /// Create a parser with every grammar that loads. A grammar that fails to
    /// load downgrades its language to the regex fallback.
    pub fn new() -> Self {
        let mut parsers = HashMap::new();
        let languages = [
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Go,
            Language::Java,
            Language::C,
            Language::Cpp,
            Language::Rust,
        ];

        for lang in languages {
            let Some(grammar) = lang.grammar() else {
                continue;
            };
            let mut parser = Parser::new();
            match parser.set_language(&grammar) {
                Ok(()) => {
                    parsers.insert(lang, parser);
                }
                Err(e) => {
                    tracing::warn!("Failed to load {} grammar: {}", lang.as_str(), e);
                }
            }
        }

        Self { parsers }
    }

    /// Parse a file into line-ordered chunks. The file stem names any
    /// module-level chunks. Unsupported languages and syntax failures yield
    /// an empty vec.
    pub fn parse_file(&mut self, path: &Path, content: &str) -> Vec<ParsedChunk> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let Some(lang) = Language::from_extension(ext) else {
            return Vec::new();
        };
        let module_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
            .to_string();

        let mut chunks = match self.parsers.get_mut(&lang) {
            Some(parser) => match parser.parse(content, None) {
                Some(tree) => {
                    if lang == Language::Python {
                        python::extract(&tree.root_node(), content, &module_name)
                    } else {
                        generic::extract(&tree.root_node(), content, lang)
                    }
                }
                None => {
                    tracing::warn!("tree-sitter gave up on {}", path.display());
                    Vec::new()
                }
            },
            None => fallback::extract(content, &module_name),
        };

        chunks.sort_by_key(|c| (c.start_line, c.end_line));
        chunks
    }
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Slice `lines` by 1-indexed inclusive bounds and rejoin.
pub(crate) fn join_lines(lines: &[&str], start_line: u32, end_line: u32) -> String {
    let start = (start_line.saturating_sub(1)) as usize;
    let end = (end_line as usize).min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}
