// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Vector store abstraction.
//!
//! The vector store is an external collaborator and the system of record for
//! embeddings. The engine consumes the minimal capability set below; the
//! bundled [`LocalVectorStore`] implements it over SQLite with cosine scoring.

mod local;

pub use local::LocalVectorStore;

use crate::error::StoreError;
use crate::types::{ChunkId, ChunkType, CodeChunk};

/// One chunk plus the document text to embed for it.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk: CodeChunk,
    pub document: String,
}

impl ChunkRecord {
    pub fn new(chunk: CodeChunk) -> Self {
        let document = chunk.embedding_document();
        Self { chunk, document }
    }
}

/// A query hit: the stored chunk and its raw vector distance.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub chunk: CodeChunk,
    /// Cosine distance, `1 - cos(query, doc)`.
    pub distance: f32,
}

/// Outcome of a batch upsert. Store-level failures surface as errors;
/// per-chunk embedding failures land in `failed` and the rest go through.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    pub upserted: Vec<ChunkId>,
    pub failed: Vec<(ChunkId, String)>,
}

/// Metadata filter: equality, `$in`, `$contains` and `$and` composition over
/// chunk metadata fields.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    Eq(String, String),
    In(String, Vec<String>),
    Contains(String, String),
    And(Vec<MetadataFilter>),
}

impl MetadataFilter {
    /// Convenience: substring match on `file_path`.
    pub fn file_contains(needle: impl Into<String>) -> Self {
        Self::Contains("file_path".to_string(), needle.into())
    }

    /// Convenience: chunk-type membership.
    pub fn type_in(types: &[ChunkType]) -> Self {
        if types.len() == 1 {
            Self::Eq("chunk_type".to_string(), types[0].as_str().to_string())
        } else {
            Self::In(
                "chunk_type".to_string(),
                types.iter().map(|t| t.as_str().to_string()).collect(),
            )
        }
    }

    pub fn matches(&self, chunk: &CodeChunk) -> bool {
        match self {
            Self::Eq(field, value) => field_value(chunk, field).map_or(false, |v| v == *value),
            Self::In(field, values) => {
                field_value(chunk, field).map_or(false, |v| values.contains(&v))
            }
            Self::Contains(field, needle) => {
                field_value(chunk, field).map_or(false, |v| v.contains(needle.as_str()))
            }
            Self::And(filters) => filters.iter().all(|f| f.matches(chunk)),
        }
    }
}

fn field_value(chunk: &CodeChunk, field: &str) -> Option<String> {
    match field {
        "file_path" => Some(chunk.file_path.clone()),
        "chunk_type" => Some(chunk.chunk_type.as_str().to_string()),
        "name" => Some(chunk.name.clone()),
        "qualified_name" => Some(chunk.qualified_name.clone()),
        "parent" => chunk.parent.clone(),
        _ => None,
    }
}

/// Minimal vector-store capability set consumed by the retriever.
pub trait VectorStore: Send + Sync {
    /// Embed and upsert a batch of chunk records.
    fn upsert(&self, records: &[ChunkRecord]) -> Result<UpsertReport, StoreError>;

    /// Query for the `k` nearest chunks under an optional metadata filter.
    fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>, StoreError>;

    /// Delete chunks by id.
    fn delete(&self, ids: &[ChunkId]) -> Result<(), StoreError>;

    /// Number of stored chunks.
    fn count(&self) -> Result<usize, StoreError>;

    /// Every stored chunk, for rebuilding in-memory state on startup.
    fn all_chunks(&self) -> Result<Vec<CodeChunk>, StoreError>;

    /// Drop and recreate the collection.
    fn reset(&self) -> Result<(), StoreError>;

    /// Identity of the embedding provider this collection was built with.
    fn embedder_identity(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(file: &str, name: &str, chunk_type: ChunkType) -> CodeChunk {
        CodeChunk {
            chunk_id: ChunkId::derive(file, name),
            file_path: file.to_string(),
            chunk_type,
            name: name.to_string(),
            qualified_name: name.to_string(),
            content: String::new(),
            start_line: 1,
            end_line: 1,
            dependencies: Vec::new(),
            parent: None,
            signature: None,
            docstring: None,
        }
    }

    #[test]
    fn test_filter_contains() {
        let c = chunk("src/auth/login.py", "login", ChunkType::Function);
        assert!(MetadataFilter::file_contains("auth").matches(&c));
        assert!(!MetadataFilter::file_contains("billing").matches(&c));
    }

    #[test]
    fn test_filter_eq_and_in() {
        let c = chunk("a.py", "f", ChunkType::Function);
        assert!(MetadataFilter::type_in(&[ChunkType::Function]).matches(&c));
        assert!(MetadataFilter::type_in(&[ChunkType::Class, ChunkType::Function]).matches(&c));
        assert!(!MetadataFilter::type_in(&[ChunkType::Class]).matches(&c));
    }

    #[test]
    fn test_filter_and_composition() {
        let c = chunk("src/auth.py", "login", ChunkType::Function);
        let filter = MetadataFilter::And(vec![
            MetadataFilter::file_contains("auth"),
            MetadataFilter::type_in(&[ChunkType::Function]),
        ]);
        assert!(filter.matches(&c));

        let filter = MetadataFilter::And(vec![
            MetadataFilter::file_contains("auth"),
            MetadataFilter::type_in(&[ChunkType::Class]),
        ]);
        assert!(!filter.matches(&c));
    }

    #[test]
    fn test_filter_missing_field_never_matches() {
        let c = chunk("a.py", "f", ChunkType::Function);
        assert!(!MetadataFilter::Eq("parent".to_string(), "X".to_string()).matches(&c));
        assert!(!MetadataFilter::Eq("bogus".to_string(), "x".to_string()).matches(&c));
    }
}
