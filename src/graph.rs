// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Name-resolved dependency graph over chunks.
//!
//! Nodes are chunk ids; a directed edge `u → v` exists when `v`'s name appears
//! in `u`'s dependency list. Names are not globally unique, so an edge may
//! connect `u` to every chunk sharing a name and consumers treat neighbor sets
//! as candidates. The graph is derived state: any sequence of incremental adds
//! and removes yields the same nodes and edges as a rebuild from the final
//! chunk set.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::types::{ChunkId, CodeChunk};

#[derive(Debug, Clone)]
struct NodeInfo {
    name: String,
    file_path: String,
    parent: Option<String>,
    dependencies: Vec<String>,
}

/// Graph statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
}

/// Callers, callees and siblings of a chunk, as candidate id sets.
#[derive(Debug, Clone, Default)]
pub struct ModificationContext {
    pub callers: Vec<ChunkId>,
    pub callees: Vec<ChunkId>,
    pub siblings: Vec<ChunkId>,
}

/// In-memory bidirectional dependency index.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<ChunkId, NodeInfo>,
    by_name: HashMap<String, BTreeSet<ChunkId>>,
    by_file: HashMap<String, BTreeSet<ChunkId>>,
    by_parent: HashMap<String, BTreeSet<ChunkId>>,
    /// dependency name -> chunks listing it.
    dependents: HashMap<String, BTreeSet<ChunkId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a full chunk set.
    pub fn from_chunks<'a>(chunks: impl IntoIterator<Item = &'a CodeChunk>) -> Self {
        let mut graph = Self::new();
        for chunk in chunks {
            graph.add_chunk(chunk);
        }
        graph
    }

    pub fn add_chunk(&mut self, chunk: &CodeChunk) {
        let id = chunk.chunk_id.clone();
        self.remove_chunk(&id);

        self.by_name
            .entry(chunk.name.clone())
            .or_default()
            .insert(id.clone());
        self.by_file
            .entry(chunk.file_path.clone())
            .or_default()
            .insert(id.clone());
        if let Some(parent) = &chunk.parent {
            self.by_parent
                .entry(parent.clone())
                .or_default()
                .insert(id.clone());
        }
        for dep in &chunk.dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(id.clone());
        }

        self.nodes.insert(
            id,
            NodeInfo {
                name: chunk.name.clone(),
                file_path: chunk.file_path.clone(),
                parent: chunk.parent.clone(),
                dependencies: chunk.dependencies.clone(),
            },
        );
    }

    pub fn remove_chunk(&mut self, id: &ChunkId) {
        let Some(info) = self.nodes.remove(id) else {
            return;
        };
        prune(&mut self.by_name, &info.name, id);
        prune(&mut self.by_file, &info.file_path, id);
        if let Some(parent) = &info.parent {
            prune(&mut self.by_parent, parent, id);
        }
        for dep in &info.dependencies {
            prune(&mut self.dependents, dep, id);
        }
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn stats(&self) -> GraphStats {
        let total_edges = self
            .nodes
            .keys()
            .map(|id| self.outgoing(id).len())
            .sum();
        GraphStats {
            total_nodes: self.nodes.len(),
            total_edges,
        }
    }

    /// Exact-match name lookup.
    pub fn chunks_by_name(&self, name: &str) -> Vec<ChunkId> {
        self.by_name
            .get(name)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Chunks in one file.
    pub fn chunks_by_file(&self, file_path: &str) -> Vec<ChunkId> {
        self.by_file
            .get(file_path)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Chunks whose dependency list names `v` (candidate callers).
    pub fn incoming(&self, id: &ChunkId) -> BTreeSet<ChunkId> {
        let Some(info) = self.nodes.get(id) else {
            return BTreeSet::new();
        };
        let mut callers = self
            .dependents
            .get(&info.name)
            .cloned()
            .unwrap_or_default();
        callers.remove(id);
        callers
    }

    /// Chunks named by `u`'s dependency list (candidate callees).
    pub fn outgoing(&self, id: &ChunkId) -> BTreeSet<ChunkId> {
        let Some(info) = self.nodes.get(id) else {
            return BTreeSet::new();
        };
        let mut callees = BTreeSet::new();
        for dep in &info.dependencies {
            if let Some(ids) = self.by_name.get(dep) {
                callees.extend(ids.iter().cloned());
            }
        }
        callees.remove(id);
        callees
    }

    /// Breadth-first traversal following edges in both directions, capped at
    /// `depth` hops. The seed set itself is excluded from the result.
    pub fn related(&self, seeds: &[ChunkId], depth: u32) -> BTreeSet<ChunkId> {
        let mut discovered: BTreeSet<ChunkId> = BTreeSet::new();
        let mut visited: BTreeSet<ChunkId> = seeds.iter().cloned().collect();
        let mut queue: VecDeque<(ChunkId, u32)> = seeds
            .iter()
            .filter(|id| self.contains(id))
            .map(|id| (id.clone(), 0))
            .collect();

        while let Some((id, dist)) = queue.pop_front() {
            if dist >= depth {
                continue;
            }
            let mut neighbors = self.outgoing(&id);
            neighbors.extend(self.incoming(&id));
            for neighbor in neighbors {
                if visited.insert(neighbor.clone()) {
                    discovered.insert(neighbor.clone());
                    queue.push_back((neighbor, dist + 1));
                }
            }
        }

        discovered
    }

    /// Callers, callees and class siblings for a modification target.
    pub fn context_for_modification(&self, id: &ChunkId) -> ModificationContext {
        let Some(info) = self.nodes.get(id) else {
            return ModificationContext::default();
        };

        let siblings = match &info.parent {
            Some(parent) => self
                .by_parent
                .get(parent)
                .map(|ids| ids.iter().filter(|s| *s != id).cloned().collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        ModificationContext {
            callers: self.incoming(id).into_iter().collect(),
            callees: self.outgoing(id).into_iter().collect(),
            siblings,
        }
    }
}

fn prune(index: &mut HashMap<String, BTreeSet<ChunkId>>, key: &str, id: &ChunkId) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}
