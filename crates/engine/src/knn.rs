//! Top-k vector search and HNSW index persistence.
//!
//! Two search paths share the same contract (top-k `(key, value)` pairs for
//! a query text or vector):
//!
//! - [`Store::search_knn`] — the exact baseline: walk every live key,
//!   score its in-memory embedding by cosine similarity, sort.
//! - [`Store::search_knn_hnsw`] — the graph: greedy descent plus base-layer
//!   beam search, filtered against deletion state, topped up from the
//!   baseline when filtering leaves fewer than `k` hits.
//!
//! Both resolve values through [`Store::get`], which drops deleted keys; a
//! query can therefore legitimately return fewer than `k` results.

use anyhow::Result;
use embedding::{cosine_similarity, is_tombstone_vector, vectors_close, DELETE_EPSILON, SEARCH_EPSILON};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::{Store, TOMBSTONE};

impl Store {
    /// Embeds `text` through the store's collaborator. `None` when the
    /// embedder fails.
    #[must_use]
    pub fn get_embedding(&self, text: &str) -> Option<Vec<f32>> {
        self.embedder.embed(text).filter(|v| !v.is_empty())
    }

    /// Exact top-`k` by cosine similarity over every live key.
    pub fn search_knn(&self, query: &str, k: usize) -> Result<Vec<(u64, String)>> {
        match self.get_embedding(query) {
            Some(vec) => self.search_knn_by_vector(&vec, k),
            None => {
                warn!("failed to embed query text, returning no results");
                Ok(Vec::new())
            }
        }
    }

    /// Vector-query form of [`search_knn`](Self::search_knn).
    ///
    /// Walks the memtable, then every run level by level; the first sighting
    /// of a key is its freshest version. Ties in similarity break toward the
    /// smaller key. Values are fetched through `get`, so deleted keys drop
    /// out even when their embedding lingers.
    pub fn search_knn_by_vector(&self, query: &[f32], k: usize) -> Result<Vec<(u64, String)>> {
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut seen: HashSet<u64> = HashSet::new();
        let mut scored: Vec<(u64, f32)> = Vec::new();

        let consider = |key: u64,
                            scored: &mut Vec<(u64, f32)>,
                            embeddings: &std::collections::HashMap<u64, Vec<f32>>| {
            if let Some(vec) = embeddings.get(&key) {
                if !vec.is_empty() && !is_tombstone_vector(vec) {
                    scored.push((key, cosine_similarity(query, vec)));
                }
            }
        };

        for (key, value) in self.mem.iter() {
            if !seen.insert(key) {
                continue;
            }
            if value == TOMBSTONE {
                continue;
            }
            consider(key, &mut scored, &self.embeddings);
        }
        for level in &self.levels {
            for h in level {
                for i in 0..h.len() {
                    let key = h.key_at(i);
                    if !seen.insert(key) {
                        continue;
                    }
                    consider(key, &mut scored, &self.embeddings);
                }
            }
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut out = Vec::with_capacity(k);
        for (key, _) in scored {
            if out.len() >= k {
                break;
            }
            let value = self.get(key)?;
            if !value.is_empty() {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Approximate top-`k` through the HNSW graph.
    pub fn search_knn_hnsw(&self, query: &str, k: usize) -> Result<Vec<(u64, String)>> {
        match self.get_embedding(query) {
            Some(vec) => self.search_knn_hnsw_by_vector(&vec, k),
            None => {
                warn!("failed to embed query text, returning no results");
                Ok(Vec::new())
            }
        }
    }

    /// Vector-query form of [`search_knn_hnsw`](Self::search_knn_hnsw).
    ///
    /// Graph candidates are already filtered against dead nodes and the
    /// loaded deleted-vector list; values resolve through `get`. When
    /// filtering leaves fewer than `k` hits, baseline candidates top up the
    /// result (subject to the same deleted-vector filter). Fewer than `k`
    /// results is a valid outcome — no placeholders are synthesized.
    pub fn search_knn_hnsw_by_vector(&self, query: &[f32], k: usize) -> Result<Vec<(u64, String)>> {
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut out: Vec<(u64, String)> = Vec::new();
        for (key, _) in self
            .graph
            .knn(query, k, &self.embeddings, &self.loaded_deleted)
        {
            if out.len() >= k {
                break;
            }
            let value = self.get(key)?;
            if !value.is_empty() {
                out.push((key, value));
            }
        }

        if out.len() < k {
            for (key, value) in self.search_knn_by_vector(query, 2 * k)? {
                if out.len() >= k {
                    break;
                }
                if out.iter().any(|(have, _)| *have == key) {
                    continue;
                }
                if let Some(vec) = self.embeddings.get(&key) {
                    if self
                        .loaded_deleted
                        .iter()
                        .any(|d| vectors_close(vec, d, SEARCH_EPSILON))
                    {
                        continue;
                    }
                }
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Persists the HNSW graph and the full deleted-vector list under `dir`.
    ///
    /// Pending deletions from this session are merged into the loaded list
    /// (deduplicated with tolerance) so a later load filters against
    /// everything ever deleted. Saving never happens implicitly.
    pub fn save_hnsw_index(&self, dir: impl AsRef<Path>, parallel: bool) -> Result<()> {
        let mut deleted = self.loaded_deleted.clone();
        for vec in &self.pending_deleted {
            if !deleted.iter().any(|d| vectors_close(d, vec, DELETE_EPSILON)) {
                deleted.push(vec.clone());
            }
        }
        hnsw::save(&self.graph, dir.as_ref(), &deleted, self.dim, parallel)
    }

    /// Replaces the in-memory graph with the index stored under `dir`.
    pub fn load_hnsw_index(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        match hnsw::load(dir, self.graph.params(), self.dim)? {
            Some(loaded) => {
                let params = *self.graph.params();
                let (graph, deleted) = loaded.into_graph(params);
                self.graph = graph;
                self.loaded_deleted = deleted;
                self.pending_deleted.clear();
                info!(dir = %dir.display(), "hnsw index replaced from disk");
            }
            None => {
                warn!(dir = %dir.display(), "no hnsw index found, keeping current graph");
            }
        }
        Ok(())
    }
}
