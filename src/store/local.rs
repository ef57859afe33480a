// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite-backed vector store.
//!
//! Stores chunk metadata, verbatim content and little-endian f32 embedding
//! blobs in one table, scoring queries with cosine similarity. The embedding
//! provider's identity is recorded in collection metadata; a collection built
//! with a different provider refuses queries and upserts until it is reset.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::error::StoreError;
#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;
use crate::types::{ChunkId, ChunkType, CodeChunk};

use super::{ChunkRecord, MetadataFilter, QueryHit, UpsertReport, VectorStore};

/// Version of the vector store format.
pub const VECTOR_STORE_VERSION: &str = "1.0.0";

/// SQLite-backed vector store.
pub struct LocalVectorStore {
    conn: Mutex<Connection>,
    provider: Arc<dyn EmbeddingProvider>,
    db_path: PathBuf,
    identity_ok: AtomicBool,
}

impl LocalVectorStore {
    /// Open or create the store under `dir`.
    pub fn open(dir: &Path, provider: Arc<dyn EmbeddingProvider>) -> Result<Self, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        std::fs::create_dir_all(dir).map_err(|e| {
            StoreError::ExecutionFailed(format!("Failed to create store directory: {}", e))
        })?;
        let db_path = dir.join("vectors.db");

        let conn = Connection::open(&db_path)
            .map_err(|e| StoreError::ConnectionFailed(format!("Failed to open database: {}", e)))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;",
        )
        .map_err(|e| StoreError::ExecutionFailed(format!("Failed to set pragmas: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
            provider,
            db_path,
            identity_ok: AtomicBool::new(true),
        };
        store.init_schema()?;
        store.check_identity()?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.open", start.elapsed());

        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                chunk_type TEXT NOT NULL,
                name TEXT NOT NULL,
                qualified_name TEXT NOT NULL,
                content TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                dependencies TEXT NOT NULL,
                parent TEXT,
                signature TEXT,
                docstring TEXT,
                document TEXT NOT NULL,
                embedding BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);
            CREATE INDEX IF NOT EXISTS idx_chunks_type ON chunks(chunk_type);
            "#,
        )
        .map_err(|e| StoreError::ExecutionFailed(format!("Failed to create schema: {}", e)))?;

        conn.execute(
            "INSERT OR IGNORE INTO metadata (key, value) VALUES ('version', ?1)",
            params![VECTOR_STORE_VERSION],
        )
        .map_err(|e| StoreError::ExecutionFailed(format!("Failed to set version: {}", e)))?;
        conn.execute(
            "INSERT OR IGNORE INTO metadata (key, value) VALUES ('metric', 'cosine')",
            [],
        )
        .map_err(|e| StoreError::ExecutionFailed(format!("Failed to set metric: {}", e)))?;
        conn.execute(
            "INSERT OR IGNORE INTO metadata (key, value) VALUES ('embedder_identity', ?1)",
            params![self.provider.identity()],
        )
        .map_err(|e| StoreError::ExecutionFailed(format!("Failed to set identity: {}", e)))?;

        Ok(())
    }

    /// Compare the recorded embedder identity against the current provider.
    fn check_identity(&self) -> Result<(), StoreError> {
        let stored: Option<String> = self
            .lock_conn()
            .query_row(
                "SELECT value FROM metadata WHERE key = 'embedder_identity'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::ExecutionFailed(format!("Identity check failed: {}", e)))?;

        let current = self.provider.identity();
        match stored {
            Some(stored) if stored != current => {
                tracing::warn!(
                    "Vector collection was built with {} but current provider is {}",
                    stored,
                    current
                );
                self.identity_ok.store(false, Ordering::SeqCst);
            }
            _ => self.identity_ok.store(true, Ordering::SeqCst),
        }
        Ok(())
    }

    fn require_identity(&self) -> Result<(), StoreError> {
        if self.identity_ok.load(Ordering::SeqCst) {
            return Ok(());
        }
        let stored: String = self
            .lock_conn()
            .query_row(
                "SELECT value FROM metadata WHERE key = 'embedder_identity'",
                [],
                |row| row.get(0),
            )
            .unwrap_or_else(|_| "unknown".to_string());
        Err(StoreError::IdentityMismatch {
            stored,
            current: self.provider.identity(),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
                f32::from_le_bytes(arr)
            })
            .collect()
    }

    fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<CodeChunk> {
        let deps_json: String = row.get("dependencies")?;
        let dependencies: Vec<String> = serde_json::from_str(&deps_json).unwrap_or_default();
        let chunk_type: String = row.get("chunk_type")?;
        Ok(CodeChunk {
            chunk_id: ChunkId(row.get("id")?),
            file_path: row.get("file_path")?,
            chunk_type: ChunkType::parse(&chunk_type).unwrap_or(ChunkType::CodeBlock),
            name: row.get("name")?,
            qualified_name: row.get("qualified_name")?,
            content: row.get("content")?,
            start_line: row.get("start_line")?,
            end_line: row.get("end_line")?,
            dependencies,
            parent: row.get("parent")?,
            signature: row.get("signature")?,
            docstring: row.get("docstring")?,
        })
    }
}

impl VectorStore for LocalVectorStore {
    fn upsert(&self, records: &[ChunkRecord]) -> Result<UpsertReport, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.require_identity()?;
        let mut report = UpsertReport::default();

        // Embed outside the connection lock; embedding dominates the cost.
        let mut prepared = Vec::with_capacity(records.len());
        for record in records {
            match self.provider.embed(&record.document) {
                Ok(embedding) => prepared.push((record, embedding)),
                Err(e) => {
                    tracing::warn!(
                        "Embedding failed for {}: {}",
                        record.chunk.qualified_name,
                        e
                    );
                    report.failed.push((record.chunk.chunk_id.clone(), e.to_string()));
                }
            }
        }

        let mut conn = self.lock_conn();
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::ExecutionFailed(format!("Failed to begin tx: {}", e)))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO chunks
                     (id, file_path, chunk_type, name, qualified_name, content,
                      start_line, end_line, dependencies, parent, signature, docstring,
                      document, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                )
                .map_err(|e| StoreError::ExecutionFailed(format!("Prepare failed: {}", e)))?;

            for (record, embedding) in &prepared {
                let chunk = &record.chunk;
                let deps_json = serde_json::to_string(&chunk.dependencies)
                    .unwrap_or_else(|_| "[]".to_string());
                stmt.execute(params![
                    chunk.chunk_id.as_str(),
                    chunk.file_path,
                    chunk.chunk_type.as_str(),
                    chunk.name,
                    chunk.qualified_name,
                    chunk.content,
                    chunk.start_line,
                    chunk.end_line,
                    deps_json,
                    chunk.parent,
                    chunk.signature,
                    chunk.docstring,
                    record.document,
                    Self::serialize_embedding(embedding),
                ])
                .map_err(|e| StoreError::ExecutionFailed(format!("Upsert failed: {}", e)))?;
                report.upserted.push(chunk.chunk_id.clone());
            }
        }
        tx.commit()
            .map_err(|e| StoreError::ExecutionFailed(format!("Commit failed: {}", e)))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.upsert", start.elapsed());

        Ok(report)
    }

    fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.require_identity()?;
        let query_embedding = self.provider.embed(text)?;

        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare("SELECT * FROM chunks")
            .map_err(|e| StoreError::QueryFailed(format!("Prepare failed: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let chunk = Self::chunk_from_row(row)?;
                let embedding_bytes: Vec<u8> = row.get("embedding")?;
                Ok((chunk, embedding_bytes))
            })
            .map_err(|e| StoreError::QueryFailed(format!("Query failed: {}", e)))?;

        let mut hits: Vec<QueryHit> = Vec::new();
        for row in rows {
            let (chunk, embedding_bytes) =
                row.map_err(|e| StoreError::QueryFailed(format!("Row read failed: {}", e)))?;
            if let Some(filter) = filter {
                if !filter.matches(&chunk) {
                    continue;
                }
            }
            let stored = Self::deserialize_embedding(&embedding_bytes);
            let distance = 1.0 - cosine_similarity(&query_embedding, &stored);
            hits.push(QueryHit { chunk, distance });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        hits.truncate(k);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.query", start.elapsed());

        Ok(hits)
    }

    fn delete(&self, ids: &[ChunkId]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let mut conn = self.lock_conn();
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::ExecutionFailed(format!("Failed to begin tx: {}", e)))?;
        {
            let mut stmt = tx
                .prepare("DELETE FROM chunks WHERE id = ?1")
                .map_err(|e| StoreError::ExecutionFailed(format!("Prepare failed: {}", e)))?;
            for id in ids {
                stmt.execute(params![id.as_str()])
                    .map_err(|e| StoreError::ExecutionFailed(format!("Delete failed: {}", e)))?;
            }
        }
        tx.commit()
            .map_err(|e| StoreError::ExecutionFailed(format!("Commit failed: {}", e)))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.delete", start.elapsed());

        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .lock_conn()
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| StoreError::QueryFailed(format!("Count failed: {}", e)))?;
        Ok(count as usize)
    }

    fn all_chunks(&self) -> Result<Vec<CodeChunk>, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare("SELECT * FROM chunks ORDER BY file_path, start_line")
            .map_err(|e| StoreError::QueryFailed(format!("Prepare failed: {}", e)))?;
        let rows = stmt
            .query_map([], Self::chunk_from_row)
            .map_err(|e| StoreError::QueryFailed(format!("Query failed: {}", e)))?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(|e| StoreError::QueryFailed(format!("Row read failed: {}", e)))?);
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.all_chunks", start.elapsed());

        Ok(chunks)
    }

    fn reset(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute("DELETE FROM chunks", [])
            .map_err(|e| StoreError::ExecutionFailed(format!("Failed to clear chunks: {}", e)))?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('embedder_identity', ?1)",
            params![self.provider.identity()],
        )
        .map_err(|e| StoreError::ExecutionFailed(format!("Failed to reset identity: {}", e)))?;
        drop(conn);
        self.identity_ok.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn embedder_identity(&self) -> String {
        self.provider.identity()
    }
}
