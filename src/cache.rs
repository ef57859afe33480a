// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Query-result cache with TTL and optional semantic matching.
//!
//! Entries are keyed by the full query fingerprint (query text, filters,
//! session context). With the semantic cache enabled, a miss can still reuse a
//! recent entry whose query embedding is cosine-close to the new query.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::embeddings::cosine_similarity;
use crate::types::RetrievalResult;

struct CacheEntry {
    results: Vec<RetrievalResult>,
    /// Embedding of the raw query text; present when semantic matching is on.
    query_embedding: Option<Vec<f32>>,
    /// Non-query part of the key; semantic reuse requires it to match exactly.
    context_key: String,
    inserted_at: Instant,
}

/// TTL-bounded query cache.
pub struct QueryCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl QueryCache {
    const DEFAULT_MAX_ENTRIES: usize = 128;

    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: Self::DEFAULT_MAX_ENTRIES,
        }
    }

    /// Exact lookup by key. Expired entries count as misses.
    pub fn get(&mut self, key: &str) -> Option<Vec<RetrievalResult>> {
        if self.ttl.is_zero() {
            return None;
        }
        match self.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                tracing::debug!("Query cache hit");
                Some(entry.results.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Fuzzy lookup: any live entry with the same context key whose query
    /// embedding is cosine-close beyond `threshold`.
    pub fn get_semantic(
        &mut self,
        query_embedding: &[f32],
        context_key: &str,
        threshold: f32,
    ) -> Option<Vec<RetrievalResult>> {
        if self.ttl.is_zero() {
            return None;
        }
        self.evict_expired();
        self.entries
            .values()
            .filter(|entry| entry.context_key == context_key)
            .filter_map(|entry| {
                let emb = entry.query_embedding.as_ref()?;
                let sim = cosine_similarity(query_embedding, emb);
                (sim >= threshold).then(|| (sim, &entry.results))
            })
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, results)| results.clone())
    }

    pub fn insert(
        &mut self,
        key: String,
        context_key: String,
        results: Vec<RetrievalResult>,
        query_embedding: Option<Vec<f32>>,
    ) {
        if self.ttl.is_zero() {
            return;
        }
        if self.entries.len() >= self.max_entries {
            self.evict_expired();
        }
        if self.entries.len() >= self.max_entries {
            // Still full: drop the oldest entry.
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                results,
                query_embedding,
                context_key,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
    }

    #[cfg(test)]
    fn backdate(&mut self, key: &str, by: Duration) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.inserted_at = Instant::now() - by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> Vec<RetrievalResult> {
        Vec::new()
    }

    #[test]
    fn test_hit_within_ttl() {
        let mut cache = QueryCache::new(Duration::from_secs(120));
        cache.insert("k".to_string(), String::new(), results(), None);
        assert!(cache.get("k").is_some());
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn test_expiry_after_ttl() {
        let mut cache = QueryCache::new(Duration::from_millis(40));
        cache.insert("k".to_string(), String::new(), results(), None);
        cache.backdate("k", Duration::from_millis(80));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let mut cache = QueryCache::new(Duration::ZERO);
        cache.insert("k".to_string(), String::new(), results(), None);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_semantic_match_requires_same_context() {
        let mut cache = QueryCache::new(Duration::from_secs(120));
        let emb = vec![1.0, 0.0];
        cache.insert(
            "k".to_string(),
            "ctx-a".to_string(),
            results(),
            Some(emb.clone()),
        );

        assert!(cache.get_semantic(&emb, "ctx-a", 0.95).is_some());
        assert!(cache.get_semantic(&emb, "ctx-b", 0.95).is_none());
        assert!(cache.get_semantic(&[0.0, 1.0], "ctx-a", 0.95).is_none());
    }

    #[test]
    fn test_capacity_eviction() {
        let mut cache = QueryCache::new(Duration::from_secs(120));
        for i in 0..200 {
            cache.insert(format!("k{}", i), String::new(), results(), None);
        }
        assert!(cache.len() <= QueryCache::DEFAULT_MAX_ENTRIES);
    }
}
