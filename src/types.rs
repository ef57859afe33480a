// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the retrieval engine.

use serde::{Deserialize, Serialize};

/// Stable identifier for a code chunk.
///
/// Derived solely from `(file_path, qualified_name)` so that upserts are
/// idempotent across runs: editing a chunk's body keeps its id, renaming or
/// moving it produces a new id and the old one is explicitly deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub String);

impl ChunkId {
    /// Derive a chunk id: 12 hex digits of SHA-256 over `file_path::qualified_name`.
    pub fn derive(file_path: &str, qualified_name: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(format!("{}::{}", file_path, qualified_name).as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        Self(hash[..12].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Type of code chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Method,
    Class,
    Imports,
    ModuleDoc,
    Script,
    CodeBlock,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Imports => "imports",
            Self::ModuleDoc => "module_doc",
            Self::Script => "script",
            Self::CodeBlock => "code_block",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "class" => Some(Self::Class),
            "imports" => Some(Self::Imports),
            "module_doc" => Some(Self::ModuleDoc),
            "script" => Some(Self::Script),
            "code_block" => Some(Self::CodeBlock),
            _ => None,
        }
    }

    /// Structural chunk types carry disjoint line spans within a file;
    /// `script` chunks cover the complementary gaps.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Function | Self::Method | Self::Class | Self::Imports | Self::ModuleDoc
        )
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A semantic chunk of code extracted for retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    /// Stable chunk id, see [`ChunkId::derive`].
    pub chunk_id: ChunkId,
    /// Project-relative path, forward slashes on every host.
    pub file_path: String,
    /// Type of code unit.
    pub chunk_type: ChunkType,
    /// Symbol name (function name, class name, `imports`, `script_L<n>`, ...).
    pub name: String,
    /// `parent.name` for methods, otherwise equal to `name`.
    pub qualified_name: String,
    /// Verbatim source text. May be truncated for oversized files, but only
    /// at grammar boundaries, never mid-line.
    pub content: String,
    /// Start line, 1-indexed inclusive.
    pub start_line: u32,
    /// End line, 1-indexed inclusive.
    pub end_line: u32,
    /// Symbol names this chunk references, sorted and deduplicated.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Parent class name when this chunk is a method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Definition line(s) through the end of the parameter list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
}

impl CodeChunk {
    /// Build the document text embedded for this chunk: a `type::name` header,
    /// the docstring when present, then the signature (or a content prefix).
    pub fn embedding_document(&self) -> String {
        let mut parts = vec![format!("{}::{}", self.chunk_type, self.name)];
        if let Some(doc) = &self.docstring {
            parts.push(doc.clone());
        }
        match &self.signature {
            Some(sig) => parts.push(sig.clone()),
            None => parts.push(truncate_chars(&self.content, 500).to_string()),
        }
        parts.join("\n")
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// Truncate a string to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// How a retrieval result was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Vector similarity search.
    Vector,
    /// 1-hop dependency graph expansion.
    Graph,
    /// Exact lookup (modification-context target).
    Direct,
    /// On-demand deep graph traversal.
    SmartJump,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::Direct => "direct",
            Self::SmartJump => "smart_jump",
        }
    }
}

impl std::fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A retrieved code chunk with relevance info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: CodeChunk,
    /// Relevance score in `[0, 1]`, higher is more relevant.
    pub score: f32,
    pub method: RetrievalMethod,
    /// Raw vector distance when `method` is `Vector`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

/// Statistics about an indexed codebase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: u32,
    pub total_chunks: u32,
    pub functions: u32,
    pub classes: u32,
    pub methods: u32,
    pub script_chunks: u32,
    pub skipped_files: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_stability() {
        let id1 = ChunkId::derive("src/auth.py", "authenticate_user");
        let id2 = ChunkId::derive("src/auth.py", "authenticate_user");
        let id3 = ChunkId::derive("src/auth.py", "verify_password");
        let id4 = ChunkId::derive("src/other.py", "authenticate_user");

        assert_eq!(id1, id2, "same inputs must produce the same id");
        assert_ne!(id1, id3, "different qualified name must change the id");
        assert_ne!(id1, id4, "different file path must change the id");
        assert_eq!(id1.as_str().len(), 12);
        assert!(id1.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_chunk_type_roundtrip() {
        let types = [
            ChunkType::Function,
            ChunkType::Method,
            ChunkType::Class,
            ChunkType::Imports,
            ChunkType::ModuleDoc,
            ChunkType::Script,
            ChunkType::CodeBlock,
        ];
        for ct in types {
            assert_eq!(ChunkType::parse(ct.as_str()), Some(ct));
        }
        assert_eq!(ChunkType::parse("struct"), None);
    }

    #[test]
    fn test_structural_types() {
        assert!(ChunkType::Function.is_structural());
        assert!(ChunkType::ModuleDoc.is_structural());
        assert!(!ChunkType::Script.is_structural());
        assert!(!ChunkType::CodeBlock.is_structural());
    }

    fn sample_chunk() -> CodeChunk {
        CodeChunk {
            chunk_id: ChunkId::derive("src/auth.py", "authenticate_user"),
            file_path: "src/auth.py".to_string(),
            chunk_type: ChunkType::Function,
            name: "authenticate_user".to_string(),
            qualified_name: "authenticate_user".to_string(),
            content: "def authenticate_user(u, p):\n    return verify_password(p, u.hash)"
                .to_string(),
            start_line: 1,
            end_line: 2,
            dependencies: vec!["verify_password".to_string()],
            parent: None,
            signature: Some("def authenticate_user(u, p):".to_string()),
            docstring: None,
        }
    }

    #[test]
    fn test_embedding_document_prefers_signature() {
        let chunk = sample_chunk();
        let doc = chunk.embedding_document();
        assert!(doc.starts_with("function::authenticate_user\n"));
        assert!(doc.contains("def authenticate_user(u, p):"));
        assert!(!doc.contains("verify_password(p, u.hash)"));
    }

    #[test]
    fn test_embedding_document_falls_back_to_content() {
        let mut chunk = sample_chunk();
        chunk.signature = None;
        let doc = chunk.embedding_document();
        assert!(doc.contains("verify_password"));
    }

    #[test]
    fn test_embedding_document_id_unchanged_by_content() {
        let mut chunk = sample_chunk();
        let before = chunk.chunk_id.clone();
        chunk.content.push_str("\n# edited");
        assert_eq!(
            before,
            ChunkId::derive(&chunk.file_path, &chunk.qualified_name)
        );
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[test]
    fn test_line_count() {
        let chunk = sample_chunk();
        assert_eq!(chunk.line_count(), 2);
    }
}
