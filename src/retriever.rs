// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hybrid retriever: the primary query entry point.
//!
//! Combines vector similarity, lexical and session-aware boosts, and 1-hop
//! dependency-graph expansion. Owns the in-memory chunk map, the dependency
//! graph and the query cache; drives incremental index builds against the
//! vector store and the index state store.
//!
//! Locking: the chunk map and graph live behind one `RwLock`. Queries take the
//! read side and see a consistent snapshot; builds take the write side per
//! file. The index state store has its own lock, acquired before the index
//! lock (`state -> index`, never the reverse). The query cache has its own
//! short-lived mutex.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::cache::QueryCache;
use crate::config::{normalize_rel_path, Config};
use crate::embeddings::{create_embedding_provider, EmbeddingProvider};
use crate::error::{IndexError, RetrievalError, StoreError};
use crate::graph::{DependencyGraph, GraphStats};
use crate::indexer::{hash_bytes, CodeIndexer, FileChunks, SourceFile};
use crate::session::SessionContext;
use crate::state::IndexStateStore;
use crate::store::{ChunkRecord, LocalVectorStore, MetadataFilter, VectorStore};
#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;
use crate::types::{
    truncate_chars, ChunkId, ChunkType, CodeChunk, RetrievalMethod, RetrievalResult,
};

/// Whole-word lexical boost when a query token matches the chunk name.
const NAME_BOOST: f32 = 0.15;
/// Lexical boost when a query token appears in the content head.
const CONTENT_BOOST: f32 = 0.05;
/// Session boost when the chunk path matches a focus file.
const FOCUS_FILE_BOOST: f32 = 0.20;
/// Session boost per task-keyword match in the query.
const TASK_KEYWORD_BOOST: f32 = 0.10;
/// Score assigned to 1-hop graph expansions.
const GRAPH_EXPANSION_SCORE: f32 = 0.5;
/// Score assigned to on-demand deep expansions.
const SMART_JUMP_SCORE: f32 = 0.4;
/// How many top results seed graph expansion.
const EXPANSION_SEEDS: usize = 3;
/// Candidate over-fetch cap.
const CANDIDATE_CAP: usize = 50;
/// Upsert batch size.
const UPSERT_BATCH: usize = 100;
/// Backoff base for transient store errors.
const RETRY_BASE: Duration = Duration::from_secs(2);
/// Total attempts for transient store errors.
const RETRY_ATTEMPTS: u32 = 3;

/// Options for [`Retriever::retrieve`].
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub k: usize,
    pub expand_graph: bool,
    /// Substring match on forward-slash file paths.
    pub file_filter: Option<String>,
    pub type_filter: Option<Vec<ChunkType>>,
    /// Minimum boosted score.
    pub threshold: f32,
    /// Expiry returns whatever was gathered so far.
    pub deadline: Option<Instant>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            k: 10,
            expand_graph: true,
            file_filter: None,
            type_filter: None,
            threshold: 0.0,
            deadline: None,
        }
    }
}

/// Categorized context for modifying a specific code location.
#[derive(Debug, Clone, Default)]
pub struct ModificationContext {
    pub target: Vec<RetrievalResult>,
    pub callers: Vec<RetrievalResult>,
    pub callees: Vec<RetrievalResult>,
    pub siblings: Vec<RetrievalResult>,
}

/// Lifecycle of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Uninitialized,
    Building,
    Ready,
    Updating,
    Failed,
}

#[derive(Default)]
struct IndexSnapshot {
    chunks: HashMap<ChunkId, CodeChunk>,
    graph: DependencyGraph,
    file_chunks: HashMap<String, Vec<ChunkId>>,
}

type StoreFactory = Box<dyn Fn() -> Result<Arc<dyn VectorStore>, StoreError> + Send + Sync>;

/// Hybrid retriever over a vector store, a dependency graph and per-file
/// index state.
pub struct Retriever {
    config: Config,
    embedder: Arc<dyn EmbeddingProvider>,
    store_factory: StoreFactory,
    store: Mutex<Option<Arc<dyn VectorStore>>>,
    index: RwLock<IndexSnapshot>,
    state: Mutex<IndexStateStore>,
    cache: Mutex<QueryCache>,
    session: Mutex<Option<SessionContext>>,
    status: Mutex<IndexStatus>,
    build_lock: Mutex<()>,
    cancel_requested: AtomicBool,
}

impl Retriever {
    /// Open a retriever with the bundled local vector store.
    pub fn open(config: Config) -> Result<Self, RetrievalError> {
        let embedder = create_embedding_provider(&config);
        let rag_dir = config.rag_dir();
        let factory_embedder = Arc::clone(&embedder);
        let factory: StoreFactory = Box::new(move || {
            LocalVectorStore::open(&rag_dir, Arc::clone(&factory_embedder))
                .map(|store| Arc::new(store) as Arc<dyn VectorStore>)
        });
        Self::with_store_factory(config, factory, embedder)
    }

    /// Open a retriever around an injected vector store.
    pub fn with_store(
        config: Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, RetrievalError> {
        let factory: StoreFactory = Box::new(move || Ok(Arc::clone(&store)));
        Self::with_store_factory(config, factory, embedder)
    }

    fn with_store_factory(
        config: Config,
        store_factory: StoreFactory,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, RetrievalError> {
        let state = IndexStateStore::open(config.index_state_path());
        let cache = QueryCache::new(Duration::from_secs(config.cache_ttl_seconds));

        let retriever = Self {
            store_factory,
            embedder,
            store: Mutex::new(None),
            index: RwLock::new(IndexSnapshot::default()),
            state: Mutex::new(state),
            cache: Mutex::new(cache),
            session: Mutex::new(None),
            status: Mutex::new(IndexStatus::Uninitialized),
            build_lock: Mutex::new(()),
            cancel_requested: AtomicBool::new(false),
            config,
        };

        if !retriever.config.lazy_load_vector_store {
            match retriever.store_handle() {
                Ok(store) => retriever.load_snapshot(&store),
                Err(e) => tracing::warn!("Vector store unavailable at startup: {}", e),
            }
        }
        Ok(retriever)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> IndexStatus {
        *lock(&self.status)
    }

    pub fn graph_stats(&self) -> GraphStats {
        read(&self.index).graph.stats()
    }

    /// Number of chunks in the in-memory map.
    pub fn chunk_count(&self) -> usize {
        read(&self.index).chunks.len()
    }

    // ------------------------------------------------------------------
    // Session context
    // ------------------------------------------------------------------

    pub fn set_session_context(&self, context: SessionContext) {
        *lock(&self.session) = Some(context);
    }

    pub fn clear_session_context(&self) {
        *lock(&self.session) = None;
    }

    pub fn session_context(&self) -> Option<SessionContext> {
        lock(&self.session).clone()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Retrieve relevant chunks for a natural-language query.
    ///
    /// Pure with respect to the index: never mutates chunks or graph. Store
    /// failures degrade to an empty result and flag the index `Failed`;
    /// the next call attempts one reconnect.
    pub fn retrieve(&self, query: &str, options: &RetrieveOptions) -> Vec<RetrievalResult> {
        #[cfg(feature = "telemetry")]
        let op_start = Instant::now();

        let session = self.session_context();
        let session_key = session.as_ref().map(|s| s.fingerprint()).unwrap_or_default();
        let context_key = format!(
            "k={}|g={}|f={:?}|t={:?}|th={}|s={}",
            options.k,
            options.expand_graph,
            options.file_filter,
            options.type_filter,
            options.threshold,
            session_key,
        );
        let cache_key = format!("{}|{}", query, context_key);

        if let Some(cached) = lock(&self.cache).get(&cache_key) {
            return cached;
        }

        let query_embedding = if self.config.semantic_cache_enabled {
            let embedding = self.embedder.embed(query).ok();
            if let Some(embedding) = &embedding {
                let hit = lock(&self.cache).get_semantic(
                    embedding,
                    &context_key,
                    self.config.semantic_cache_threshold,
                );
                if let Some(results) = hit {
                    return results;
                }
            }
            embedding
        } else {
            None
        };

        let filter = build_filter(options);
        let fetch = (options.k * 2).min(CANDIDATE_CAP).max(options.k.min(CANDIDATE_CAP));

        let store = match self.store_for_query() {
            Some(store) => store,
            None => return Vec::new(),
        };
        let hits = match with_retry(|| store.query(query, fetch, filter.as_ref())) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("Vector query failed: {}", e);
                self.mark_store_failed();
                return Vec::new();
            }
        };

        let query_tokens = tokenize(query);
        let mut results: Vec<RetrievalResult> = Vec::new();
        let mut seen: HashSet<ChunkId> = HashSet::new();

        {
            let index = read(&self.index);
            for hit in hits {
                if seen.contains(&hit.chunk.chunk_id) {
                    continue;
                }
                let chunk = index
                    .chunks
                    .get(&hit.chunk.chunk_id)
                    .cloned()
                    .unwrap_or(hit.chunk);

                let sim = 1.0 - hit.distance.min(1.0);
                let score = boost_score(sim, &chunk, &query_tokens, session.as_ref());
                if score < options.threshold {
                    // Below-threshold candidates stay eligible for expansion.
                    continue;
                }
                seen.insert(chunk.chunk_id.clone());
                results.push(RetrievalResult {
                    chunk,
                    score,
                    method: RetrievalMethod::Vector,
                    distance: Some(hit.distance),
                });
            }

            if deadline_expired(options) {
                return finish(results, options.k);
            }

            if options.expand_graph && !results.is_empty() {
                let mut top: Vec<&RetrievalResult> = results.iter().collect();
                top.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let seeds: Vec<ChunkId> = top
                    .iter()
                    .take(EXPANSION_SEEDS)
                    .map(|r| r.chunk.chunk_id.clone())
                    .collect();

                for id in index.graph.related(&seeds, 1) {
                    if seen.contains(&id) {
                        continue;
                    }
                    if let Some(chunk) = index.chunks.get(&id) {
                        seen.insert(id);
                        results.push(RetrievalResult {
                            chunk: chunk.clone(),
                            score: GRAPH_EXPANSION_SCORE,
                            method: RetrievalMethod::Graph,
                            distance: None,
                        });
                    }
                }
            }
        }

        let results = finish(results, options.k);
        lock(&self.cache).insert(cache_key, context_key, results.clone(), query_embedding);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("retriever.retrieve", op_start.elapsed());

        results
    }

    /// Async wrapper running [`Self::retrieve`] on the blocking pool.
    pub async fn retrieve_async(
        self: &Arc<Self>,
        query: String,
        options: RetrieveOptions,
    ) -> Vec<RetrievalResult> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.retrieve(&query, &options))
            .await
            .unwrap_or_default()
    }

    /// Target, callers, callees and siblings for a modification site.
    ///
    /// Never fails: an unknown location yields the all-empty context.
    pub fn get_modification_context(
        &self,
        file_path: &str,
        function_name: Option<&str>,
        class_name: Option<&str>,
    ) -> ModificationContext {
        #[cfg(feature = "telemetry")]
        let op_start = Instant::now();

        let Some(target_name) = function_name.or(class_name) else {
            return ModificationContext::default();
        };
        let file_filter = file_path.replace('\\', "/");

        let index = read(&self.index);
        let mut candidates: Vec<ChunkId> = index.graph.chunks_by_name(target_name);
        if !file_filter.is_empty() {
            candidates.retain(|id| {
                index
                    .chunks
                    .get(id)
                    .map(|c| c.file_path.contains(&file_filter))
                    .unwrap_or(false)
            });
        }
        let Some(target_id) = candidates.into_iter().next() else {
            return ModificationContext::default();
        };
        let Some(target_chunk) = index.chunks.get(&target_id) else {
            return ModificationContext::default();
        };

        let graph_context = index.graph.context_for_modification(&target_id);
        let to_results = |ids: &[ChunkId], score: f32| -> Vec<RetrievalResult> {
            ids.iter()
                .filter_map(|id| index.chunks.get(id))
                .map(|chunk| RetrievalResult {
                    chunk: chunk.clone(),
                    score,
                    method: RetrievalMethod::Graph,
                    distance: None,
                })
                .collect()
        };

        let context = ModificationContext {
            target: vec![RetrievalResult {
                chunk: target_chunk.clone(),
                score: 1.0,
                method: RetrievalMethod::Direct,
                distance: None,
            }],
            callers: to_results(&graph_context.callers, 0.8),
            callees: to_results(&graph_context.callees, 0.7),
            siblings: to_results(&graph_context.siblings, 0.6),
        };

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("retriever.modification_context", op_start.elapsed());

        context
    }

    /// On-demand deeper traversal from a known chunk.
    pub fn smart_expand(&self, chunk_id: &ChunkId, depth: u32) -> Vec<RetrievalResult> {
        #[cfg(feature = "telemetry")]
        let op_start = Instant::now();

        let depth = depth.clamp(1, 5);
        let index = read(&self.index);
        if !index.graph.contains(chunk_id) {
            return Vec::new();
        }
        let results: Vec<RetrievalResult> = index
            .graph
            .related(std::slice::from_ref(chunk_id), depth)
            .into_iter()
            .filter_map(|id| index.chunks.get(&id).cloned())
            .map(|chunk| RetrievalResult {
                chunk,
                score: SMART_JUMP_SCORE,
                method: RetrievalMethod::SmartJump,
                distance: None,
            })
            .collect();

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("retriever.smart_expand", op_start.elapsed());

        results
    }

    // ------------------------------------------------------------------
    // Index builds
    // ------------------------------------------------------------------

    /// Request cancellation of a running build at the next file boundary.
    pub fn cancel_build(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Build or incrementally refresh the index. Returns the total number of
    /// chunks in the index afterwards.
    pub fn build_index(&self, force: bool) -> Result<usize, RetrievalError> {
        #[cfg(feature = "telemetry")]
        let op_start = Instant::now();

        let _build = lock(&self.build_lock);
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.set_status(if self.status() == IndexStatus::Ready {
            IndexStatus::Updating
        } else {
            IndexStatus::Building
        });

        let result = self.build_inner(force);
        match &result {
            Ok(count) => {
                self.set_status(IndexStatus::Ready);
                tracing::info!("Index ready with {} chunks", count);
            }
            Err(e) => {
                self.set_status(IndexStatus::Failed);
                tracing::warn!("Index build failed: {}", e);
            }
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("retriever.build_index", op_start.elapsed());

        result
    }

    /// Async wrapper running [`Self::build_index`] on the blocking pool.
    pub async fn build_index_async(self: &Arc<Self>, force: bool) -> Result<usize, RetrievalError> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.build_index(force))
            .await
            .map_err(|e| RetrievalError::Index(IndexError::WalkFailed(format!("join: {}", e))))?
    }

    fn build_inner(&self, force: bool) -> Result<usize, RetrievalError> {
        let store = self.store_handle().map_err(RetrievalError::Store)?;

        if force {
            with_retry(|| store.reset()).map_err(RetrievalError::Store)?;
            lock(&self.state).reset().map_err(RetrievalError::State)?;
            let mut index = write(&self.index);
            *index = IndexSnapshot::default();
            drop(index);
            lock(&self.cache).clear();
        }

        let mut indexer = CodeIndexer::new(&self.config).map_err(RetrievalError::Index)?;
        let files = indexer.collect_files().map_err(RetrievalError::Index)?;

        // Hash every current file up front so change detection never parses.
        let mut hashes: HashMap<String, String> = HashMap::new();
        let mut sources: HashMap<String, SourceFile> = HashMap::new();
        for file in files {
            if let Ok(bytes) = std::fs::read(&file.abs_path) {
                hashes.insert(file.rel_path.clone(), hash_bytes(&bytes));
                sources.insert(file.rel_path.clone(), file);
            }
        }
        let current_paths: HashSet<String> = hashes.keys().cloned().collect();

        let (changed, stale) = {
            let state = lock(&self.state);
            (state.changed_files(&hashes), state.stale_files(&current_paths))
        };

        // Deletes for stale files precede inserts for changed files.
        for rel_path in &stale {
            self.remove_file(&store, rel_path)?;
        }

        for rel_path in &changed {
            if self.cancel_requested.load(Ordering::SeqCst) {
                tracing::info!("Index build cancelled after committing completed files");
                break;
            }
            let Some(source) = sources.get(rel_path) else {
                continue;
            };
            self.reindex_file(&store, &mut indexer, source)?;
        }

        Ok(self.chunk_count())
    }

    /// Re-index a single file (file-watcher entry point). Returns the number
    /// of chunks now indexed for that file.
    pub fn update_file(&self, path: &Path) -> Result<usize, RetrievalError> {
        #[cfg(feature = "telemetry")]
        let op_start = Instant::now();

        let _build = lock(&self.build_lock);
        if self.status() == IndexStatus::Ready {
            self.set_status(IndexStatus::Updating);
        }

        let result = self.update_file_inner(path);
        self.set_status(match &result {
            Ok(_) => IndexStatus::Ready,
            Err(_) => IndexStatus::Failed,
        });

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("retriever.update_file", op_start.elapsed());

        result
    }

    fn update_file_inner(&self, path: &Path) -> Result<usize, RetrievalError> {
        let store = self.store_handle().map_err(RetrievalError::Store)?;
        let rel_path = normalize_rel_path(&self.config.project_root, path);

        if !path.exists() {
            self.remove_file(&store, &rel_path)?;
            return Ok(0);
        }

        let bytes = std::fs::read(path).map_err(|e| RetrievalError::Index(e.into()))?;
        let hash = hash_bytes(&bytes);
        let unchanged = lock(&self.state)
            .get(&rel_path)
            .map(|r| r.content_hash == hash)
            .unwrap_or(false);
        if unchanged {
            return Ok(read(&self.index)
                .file_chunks
                .get(&rel_path)
                .map(|ids| ids.len())
                .unwrap_or(0));
        }

        let mut indexer = CodeIndexer::new(&self.config).map_err(RetrievalError::Index)?;
        let source = SourceFile {
            abs_path: path.to_path_buf(),
            rel_path: rel_path.clone(),
        };
        self.reindex_file(&store, &mut indexer, &source)?;
        Ok(read(&self.index)
            .file_chunks
            .get(&rel_path)
            .map(|ids| ids.len())
            .unwrap_or(0))
    }

    /// Drop one file from the store, the state store and the snapshot.
    fn remove_file(
        &self,
        store: &Arc<dyn VectorStore>,
        rel_path: &str,
    ) -> Result<(), RetrievalError> {
        // Vector deletes happen under the state lock; state -> index order.
        let mut state = lock(&self.state);
        let ids = state.forget(rel_path).map_err(RetrievalError::State)?;
        if !ids.is_empty() {
            with_retry(|| store.delete(&ids)).map_err(RetrievalError::Store)?;
        }
        drop(state);

        let mut index = write(&self.index);
        if let Some(ids) = index.file_chunks.remove(rel_path) {
            for id in ids {
                index.chunks.remove(&id);
                index.graph.remove_chunk(&id);
            }
        }
        drop(index);
        lock(&self.cache).clear();
        Ok(())
    }

    /// Parse and upsert one file, then commit its record and snapshot entry.
    fn reindex_file(
        &self,
        store: &Arc<dyn VectorStore>,
        indexer: &mut CodeIndexer,
        source: &SourceFile,
    ) -> Result<(), RetrievalError> {
        let Some(FileChunks {
            rel_path,
            content_hash,
            chunks,
        }) = indexer.index_file(source)
        else {
            // Unparseable now; leave any previous version in place.
            return Ok(());
        };

        let mut upserted_ids: Vec<ChunkId> = Vec::new();
        let mut upserted_chunks: Vec<CodeChunk> = Vec::new();
        for batch in chunks.chunks(UPSERT_BATCH) {
            let records: Vec<ChunkRecord> =
                batch.iter().cloned().map(ChunkRecord::new).collect();
            let report = with_retry(|| store.upsert(&records)).map_err(RetrievalError::Store)?;
            for (id, reason) in &report.failed {
                tracing::warn!("Skipping chunk {} ({}): {}", id, rel_path, reason);
            }
            let ok: HashSet<&ChunkId> = report.upserted.iter().collect();
            for chunk in batch {
                if ok.contains(&chunk.chunk_id) {
                    upserted_ids.push(chunk.chunk_id.clone());
                    upserted_chunks.push(chunk.clone());
                }
            }
        }

        // Old ids that did not survive the re-parse are explicitly deleted.
        let mut state = lock(&self.state);
        let old_ids: Vec<ChunkId> = state
            .get(&rel_path)
            .map(|r| r.chunk_ids.clone())
            .unwrap_or_default();
        let new_set: HashSet<&ChunkId> = upserted_ids.iter().collect();
        let removed: Vec<ChunkId> = old_ids
            .into_iter()
            .filter(|id| !new_set.contains(id))
            .collect();
        if !removed.is_empty() {
            with_retry(|| store.delete(&removed)).map_err(RetrievalError::Store)?;
        }
        // The record is written only after the upsert succeeded.
        state
            .record(&rel_path, &content_hash, upserted_ids.clone())
            .map_err(RetrievalError::State)?;
        drop(state);

        let mut index = write(&self.index);
        if let Some(previous) = index.file_chunks.remove(&rel_path) {
            for id in previous {
                index.chunks.remove(&id);
                index.graph.remove_chunk(&id);
            }
        }
        for chunk in upserted_chunks {
            index.graph.add_chunk(&chunk);
            index.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        index.file_chunks.insert(rel_path, upserted_ids);
        drop(index);

        lock(&self.cache).clear();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Store plumbing
    // ------------------------------------------------------------------

    fn store_handle(&self) -> Result<Arc<dyn VectorStore>, StoreError> {
        let mut guard = lock(&self.store);
        if let Some(store) = &*guard {
            return Ok(Arc::clone(store));
        }
        let store = (self.store_factory)()?;
        *guard = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Store handle for queries: a failed store gets one reconnect attempt,
    /// further failures surface as "unavailable" empty results upstream.
    fn store_for_query(&self) -> Option<Arc<dyn VectorStore>> {
        match self.store_handle() {
            Ok(store) => {
                if self.status() == IndexStatus::Failed {
                    self.load_snapshot(&store);
                    self.set_status(IndexStatus::Ready);
                }
                Some(store)
            }
            Err(e) => {
                tracing::warn!("Vector store unavailable: {}", e);
                self.set_status(IndexStatus::Failed);
                None
            }
        }
    }

    fn mark_store_failed(&self) {
        *lock(&self.store) = None;
        self.set_status(IndexStatus::Failed);
    }

    /// Rebuild the in-memory snapshot from the store contents.
    fn load_snapshot(&self, store: &Arc<dyn VectorStore>) {
        let chunks = match store.all_chunks() {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!("Failed to load chunks from store: {}", e);
                return;
            }
        };
        if chunks.is_empty() {
            return;
        }

        let mut snapshot = IndexSnapshot::default();
        for chunk in chunks {
            snapshot
                .file_chunks
                .entry(chunk.file_path.clone())
                .or_default()
                .push(chunk.chunk_id.clone());
            snapshot.graph.add_chunk(&chunk);
            snapshot.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        let count = snapshot.chunks.len();
        *write(&self.index) = snapshot;
        self.set_status(IndexStatus::Ready);
        tracing::info!("Loaded {} chunks from existing index", count);
    }

    fn set_status(&self, status: IndexStatus) {
        *lock(&self.status) = status;
    }
}

// ----------------------------------------------------------------------
// Scoring helpers
// ----------------------------------------------------------------------

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Apply lexical and session boosts to a base similarity, capped at 1.0.
fn boost_score(
    sim: f32,
    chunk: &CodeChunk,
    query_tokens: &[String],
    session: Option<&SessionContext>,
) -> f32 {
    let mut score = sim;

    let name_tokens = tokenize(&chunk.name);
    if query_tokens.iter().any(|t| name_tokens.contains(t)) {
        score += NAME_BOOST;
    }
    let head = truncate_chars(&chunk.content, 500);
    let head_tokens = tokenize(head);
    if query_tokens.iter().any(|t| head_tokens.contains(t)) {
        score += CONTENT_BOOST;
    }

    if let Some(session) = session {
        if session
            .focus_files
            .iter()
            .any(|f| !f.is_empty() && chunk.file_path.contains(f.as_str()))
        {
            score += FOCUS_FILE_BOOST;
        }
        let matches = session
            .task_type
            .keywords()
            .iter()
            .filter(|kw| query_tokens.iter().any(|t| t == *kw))
            .count();
        score += TASK_KEYWORD_BOOST * matches as f32;
    }

    score.min(1.0)
}

fn build_filter(options: &RetrieveOptions) -> Option<MetadataFilter> {
    let mut filters = Vec::new();
    if let Some(file_filter) = &options.file_filter {
        if !file_filter.is_empty() {
            filters.push(MetadataFilter::file_contains(file_filter.replace('\\', "/")));
        }
    }
    if let Some(types) = &options.type_filter {
        if !types.is_empty() {
            filters.push(MetadataFilter::type_in(types));
        }
    }
    match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(MetadataFilter::And(filters)),
    }
}

fn deadline_expired(options: &RetrieveOptions) -> bool {
    options
        .deadline
        .map(|deadline| Instant::now() >= deadline)
        .unwrap_or(false)
}

/// Sort by score descending (chunk id as a deterministic tie-break) and cap.
fn finish(mut results: Vec<RetrievalResult>, k: usize) -> Vec<RetrievalResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
    results.truncate(k);
    results
}

/// Retry transient store failures with exponential backoff.
fn with_retry<T>(op: impl Fn() -> Result<T, StoreError>) -> Result<T, StoreError> {
    let mut delay = RETRY_BASE;
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < RETRY_ATTEMPTS => {
                attempt += 1;
                tracing::warn!("Transient store error (attempt {}): {}", attempt, e);
                std::thread::sleep(delay);
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(rwlock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(rwlock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbeddingProvider;
    use crate::session::TaskType;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn write_file(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn offline_config(root: &Path) -> Config {
        let mut config = Config::new(root);
        config.offline_mode = true;
        config
    }

    fn retriever_for(root: &Path) -> Retriever {
        Retriever::open(offline_config(root)).unwrap()
    }

    #[test]
    fn test_empty_project_boundaries() {
        let dir = tempdir().unwrap();
        let retriever = retriever_for(dir.path());

        assert_eq!(retriever.build_index(false).unwrap(), 0);
        assert!(retriever
            .retrieve("anything", &RetrieveOptions::default())
            .is_empty());
        let context = retriever.get_modification_context("src/x.py", Some("f"), None);
        assert!(context.target.is_empty());
        assert!(context.callers.is_empty());
        assert!(context.callees.is_empty());
        assert!(context.siblings.is_empty());
    }

    #[test]
    fn test_function_search_scenario() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "src/auth.py",
            "def authenticate_user(u, p):\n    return verify_password(p, u.hash)\n",
        );

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        let results = retriever.retrieve(
            "verify user password",
            &RetrieveOptions {
                k: 5,
                ..Default::default()
            },
        );
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.name, "authenticate_user");
        assert_eq!(results[0].method, RetrievalMethod::Vector);
    }

    #[test]
    fn test_modification_context_scenario() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "src/api.py",
            "def handle_request(req):\n    return log_event(req)\n",
        );
        write_file(
            dir.path(),
            "src/main.py",
            "def serve():\n    return handle_request(None)\n",
        );
        write_file(
            dir.path(),
            "src/log.py",
            "def log_event(e):\n    return e\n",
        );

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        let context =
            retriever.get_modification_context("src/api.py", Some("handle_request"), None);
        assert_eq!(context.target.len(), 1);
        let target = &context.target[0];
        assert_eq!(target.chunk.name, "handle_request");
        assert_eq!(target.method, RetrievalMethod::Direct);
        assert!((target.score - 1.0).abs() < 1e-6);

        let caller_names: Vec<&str> = context
            .callers
            .iter()
            .map(|r| r.chunk.name.as_str())
            .collect();
        assert!(caller_names.contains(&"serve"));
        assert!((context.callers[0].score - 0.8).abs() < 1e-6);

        let callee_names: Vec<&str> = context
            .callees
            .iter()
            .map(|r| r.chunk.name.as_str())
            .collect();
        assert!(callee_names.contains(&"log_event"));
        assert!(context.siblings.is_empty());
    }

    #[test]
    fn test_incremental_rename_scenario() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "src/util.py", "def helper():\n    return 1\n");
        write_file(dir.path(), "src/other.py", "def untouched():\n    return 2\n");

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        let old_id = ChunkId::derive("src/util.py", "helper");
        let untouched_id = ChunkId::derive("src/other.py", "untouched");
        assert!(read(&retriever.index).chunks.contains_key(&old_id));

        write_file(dir.path(), "src/util.py", "def helper2():\n    return 1\n");
        retriever.build_index(false).unwrap();

        let new_id = ChunkId::derive("src/util.py", "helper2");
        let index = read(&retriever.index);
        assert!(!index.chunks.contains_key(&old_id));
        assert!(index.chunks.contains_key(&new_id));
        assert!(index.chunks.contains_key(&untouched_id));
        drop(index);

        let state = lock(&retriever.state);
        let record = state.get("src/util.py").unwrap();
        assert_eq!(record.chunk_ids, vec![new_id.clone()]);
        drop(state);

        let store = retriever.store_handle().unwrap();
        let stored_ids: Vec<ChunkId> = store
            .all_chunks()
            .unwrap()
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        assert!(stored_ids.contains(&new_id));
        assert!(!stored_ids.contains(&old_id));
        assert!(stored_ids.contains(&untouched_id));
    }

    #[test]
    fn test_stale_sweep_scenario() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "src/old.py", "def gone():\n    return 0\n");
        write_file(dir.path(), "src/keep.py", "def keep():\n    return 1\n");

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        let keep_hash = lock(&retriever.state)
            .get("src/keep.py")
            .unwrap()
            .content_hash
            .clone();

        std::fs::remove_file(dir.path().join("src/old.py")).unwrap();
        retriever.build_index(false).unwrap();

        let state = lock(&retriever.state);
        assert!(state.get("src/old.py").is_none());
        assert_eq!(state.get("src/keep.py").unwrap().content_hash, keep_hash);
        drop(state);

        let gone_id = ChunkId::derive("src/old.py", "gone");
        let store = retriever.store_handle().unwrap();
        assert!(store
            .all_chunks()
            .unwrap()
            .iter()
            .all(|c| c.chunk_id != gone_id));
    }

    #[test]
    fn test_incremental_matches_force_rebuild() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.py", "def a():\n    return b()\n");
        write_file(dir.path(), "b.py", "def b():\n    return 1\n");

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();
        write_file(dir.path(), "a.py", "def a():\n    return b() + 1\n");
        write_file(dir.path(), "c.py", "def c():\n    return a()\n");
        retriever.build_index(false).unwrap();
        let incremental: std::collections::BTreeSet<ChunkId> =
            read(&retriever.index).chunks.keys().cloned().collect();

        let forced = retriever.build_index(true).unwrap();
        let rebuilt: std::collections::BTreeSet<ChunkId> =
            read(&retriever.index).chunks.keys().cloned().collect();

        assert_eq!(incremental, rebuilt);
        assert_eq!(forced, rebuilt.len());
    }

    #[test]
    fn test_query_cache_single_store_call() {
        struct CountingStore {
            inner: LocalVectorStore,
            queries: AtomicUsize,
        }
        impl VectorStore for CountingStore {
            fn upsert(
                &self,
                records: &[ChunkRecord],
            ) -> Result<crate::store::UpsertReport, StoreError> {
                self.inner.upsert(records)
            }
            fn query(
                &self,
                text: &str,
                k: usize,
                filter: Option<&MetadataFilter>,
            ) -> Result<Vec<crate::store::QueryHit>, StoreError> {
                self.queries.fetch_add(1, Ordering::SeqCst);
                self.inner.query(text, k, filter)
            }
            fn delete(&self, ids: &[ChunkId]) -> Result<(), StoreError> {
                self.inner.delete(ids)
            }
            fn count(&self) -> Result<usize, StoreError> {
                self.inner.count()
            }
            fn all_chunks(&self) -> Result<Vec<CodeChunk>, StoreError> {
                self.inner.all_chunks()
            }
            fn reset(&self) -> Result<(), StoreError> {
                self.inner.reset()
            }
            fn embedder_identity(&self) -> String {
                self.inner.embedder_identity()
            }
        }

        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.py", "def alpha():\n    return 1\n");

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new());
        let store = Arc::new(CountingStore {
            inner: LocalVectorStore::open(&dir.path().join("rag"), Arc::clone(&embedder)).unwrap(),
            queries: AtomicUsize::new(0),
        });
        let counting: Arc<CountingStore> = Arc::clone(&store);

        let retriever =
            Retriever::with_store(offline_config(dir.path()), store, embedder).unwrap();
        retriever.build_index(false).unwrap();

        let options = RetrieveOptions::default();
        let first = retriever.retrieve("x", &options);
        let second = retriever.retrieve("x", &options);
        assert_eq!(counting.queries.load(Ordering::SeqCst), 1);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chunk.chunk_id, b.chunk.chunk_id);
            assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn test_cache_key_includes_session_context() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "src/auth.py", "def login():\n    return 1\n");

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        // Query chosen so the base score sits far below the cap, keeping the
        // focus-file boost observable.
        let options = RetrieveOptions::default();
        let before = retriever.retrieve("session timeout", &options);

        retriever.set_session_context(
            SessionContext::new(TaskType::Debugging)
                .with_focus_files(vec!["src/auth.py".to_string()]),
        );
        let after = retriever.retrieve("session timeout", &options);

        // The boost must apply despite the earlier cached entry for the same
        // query string.
        assert!(after[0].score > before[0].score + FOCUS_FILE_BOOST - 0.01);
    }

    #[test]
    fn test_session_boosts_rank_focus_files_higher() {
        let dir = tempdir().unwrap();
        let body = "def check(request, retries):\n    return retry_with(request, retries)\n";
        write_file(dir.path(), "src/auth.py", body);
        write_file(dir.path(), "src/billing.py", body);

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        // A query that barely matches either chunk leaves the focus-file
        // boost as the deciding factor.
        retriever.set_session_context(
            SessionContext::new(TaskType::General)
                .with_focus_files(vec!["src/auth.py".to_string()]),
        );
        let results = retriever.retrieve("retry logic", &RetrieveOptions::default());
        assert_eq!(results[0].chunk.file_path, "src/auth.py");
        assert!(results[0].score > results[1].score);

        retriever.clear_session_context();
        assert!(retriever.session_context().is_none());
    }

    #[test]
    fn test_graph_expansion_adds_neighbors() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "src/auth.py",
            "def authenticate_user(u, p):\n    return verify_password(p, u.hash)\n\n\ndef verify_password(p, h):\n    return p == h\n",
        );

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        // The threshold drops verify_password from the vector stage; graph
        // expansion pulls it back in as a neighbor of the top result.
        let options = RetrieveOptions {
            threshold: 0.3,
            ..Default::default()
        };
        let results = retriever.retrieve("authenticate user", &options);
        assert_eq!(results[0].chunk.name, "authenticate_user");
        assert_eq!(results[0].method, RetrievalMethod::Vector);

        let expanded = results
            .iter()
            .find(|r| r.chunk.name == "verify_password")
            .expect("graph expansion should surface the callee");
        assert_eq!(expanded.method, RetrievalMethod::Graph);
        assert!((expanded.score - 0.5).abs() < 1e-6);

        let no_expand = retriever.retrieve(
            "authenticate user",
            &RetrieveOptions {
                threshold: 0.3,
                expand_graph: false,
                ..Default::default()
            },
        );
        assert!(no_expand.iter().all(|r| r.method == RetrievalMethod::Vector));
        assert!(no_expand.iter().all(|r| r.chunk.name != "verify_password"));
    }

    #[test]
    fn test_type_and_file_filters() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "src/auth.py",
            "import os\n\n\ndef login():\n    return os.getenv(\"U\")\n",
        );
        write_file(dir.path(), "src/billing.py", "def invoice():\n    return 1\n");

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        let results = retriever.retrieve(
            "login",
            &RetrieveOptions {
                file_filter: Some("auth".to_string()),
                type_filter: Some(vec![ChunkType::Function]),
                expand_graph: false,
                ..Default::default()
            },
        );
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|r| r.chunk.file_path.contains("auth")
                && r.chunk.chunk_type == ChunkType::Function));
    }

    #[test]
    fn test_threshold_filters_results() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.py", "def unrelated():\n    return 9\n");

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        let results = retriever.retrieve(
            "quantum flux capacitor",
            &RetrieveOptions {
                threshold: 0.99,
                expand_graph: false,
                ..Default::default()
            },
        );
        assert!(results.is_empty());
    }

    #[test]
    fn test_smart_expand_clamps_depth_and_handles_unknown() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "a.py",
            "def a():\n    return b()\n\n\ndef b():\n    return c()\n\n\ndef c():\n    return 1\n",
        );

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        let a_id = ChunkId::derive("a.py", "a");
        let results = retriever.smart_expand(&a_id, 99);
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|r| r.method == RetrievalMethod::SmartJump && (r.score - 0.4).abs() < 1e-6));

        assert!(retriever
            .smart_expand(&ChunkId::from("000000000000"), 2)
            .is_empty());
    }

    #[test]
    fn test_update_file_roundtrip() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "m.py", "def one():\n    return 1\n");

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();
        assert_eq!(retriever.chunk_count(), 1);

        write_file(
            dir.path(),
            "m.py",
            "def one():\n    return 1\n\n\ndef two():\n    return 2\n",
        );
        let count = retriever.update_file(&dir.path().join("m.py")).unwrap();
        assert_eq!(count, 2);
        assert_eq!(retriever.chunk_count(), 2);

        std::fs::remove_file(dir.path().join("m.py")).unwrap();
        let count = retriever.update_file(&dir.path().join("m.py")).unwrap();
        assert_eq!(count, 0);
        assert_eq!(retriever.chunk_count(), 0);
    }

    #[test]
    fn test_snapshot_reload_from_store() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "m.py", "def f():\n    return g()\n");

        {
            let retriever = retriever_for(dir.path());
            retriever.build_index(false).unwrap();
        }

        // A fresh engine over the same project restores chunks and graph
        // without re-indexing.
        let retriever = retriever_for(dir.path());
        assert_eq!(retriever.status(), IndexStatus::Ready);
        assert_eq!(retriever.chunk_count(), 1);
        let context = retriever.get_modification_context("m.py", Some("f"), None);
        assert_eq!(context.target.len(), 1);
    }

    #[test]
    fn test_lazy_store_defers_initialization() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.py", "def alpha():\n    return 1\n");

        let mut config = offline_config(dir.path());
        config.lazy_load_vector_store = true;
        let retriever = Retriever::open(config).unwrap();

        let db_path = dir.path().join(".codescout/rag/vectors.db");
        assert!(!db_path.exists(), "store must not open before first use");

        retriever.build_index(false).unwrap();
        assert!(db_path.exists());
        assert_eq!(retriever.chunk_count(), 1);
    }

    #[test]
    fn test_status_transitions() {
        let dir = tempdir().unwrap();
        let retriever = retriever_for(dir.path());
        assert_eq!(retriever.status(), IndexStatus::Uninitialized);
        retriever.build_index(false).unwrap();
        assert_eq!(retriever.status(), IndexStatus::Ready);
        retriever.build_index(false).unwrap();
        assert_eq!(retriever.status(), IndexStatus::Ready);
    }

    #[test]
    fn test_deadline_returns_partial() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.py", "def alpha():\n    return 1\n");

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();

        let results = retriever.retrieve(
            "alpha",
            &RetrieveOptions {
                deadline: Some(Instant::now()),
                ..Default::default()
            },
        );
        // Expired deadline still returns whatever the vector stage gathered.
        assert!(results.iter().all(|r| r.method == RetrievalMethod::Vector));
    }

    #[cfg(feature = "telemetry")]
    #[test]
    fn test_operations_record_metrics() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.py", "def alpha():\n    return 1\n");

        let retriever = retriever_for(dir.path());
        retriever.build_index(false).unwrap();
        retriever.retrieve("alpha", &RetrieveOptions::default());

        let metrics = &crate::telemetry::metrics::GLOBAL_METRICS;
        assert!(metrics
            .operation_metrics("retriever.build_index")
            .map(|m| m.count >= 1)
            .unwrap_or(false));
        assert!(metrics
            .operation_metrics("retriever.retrieve")
            .map(|m| m.count >= 1)
            .unwrap_or(false));
        assert!(metrics
            .operation_metrics("store.query")
            .map(|m| m.count >= 1)
            .unwrap_or(false));
        assert!(metrics
            .operation_metrics("indexer.index_file")
            .map(|m| m.count >= 1)
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn test_async_entry_points() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.py", "def alpha():\n    return 1\n");

        let retriever = Arc::new(retriever_for(dir.path()));
        let count = retriever.build_index_async(false).await.unwrap();
        assert_eq!(count, 1);

        let results = retriever
            .retrieve_async("alpha".to_string(), RetrieveOptions::default())
            .await;
        assert_eq!(results[0].chunk.name, "alpha");
    }
}
