//! # Engine - DriftKV Storage Engine
//!
//! The central orchestrator that ties together the [`memtable`], [`sstable`],
//! [`embedding`], and [`hnsw`] crates into a persistent key-value store with
//! approximate vector search.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────────┐
//! │                     STORE                         │
//! │                                                   │
//! │ write.rs → embed value → Memtable insert          │
//! │              |            → HNSW insert           │
//! │              |  (byte budget exceeded?)           │
//! │              |            yes                     │
//! │              v                                    │
//! │           flush() → new L0 SSTable                │
//! │              |      + embedding log append        │
//! │              |  (level over capacity?)            │
//! │              |            yes                     │
//! │              v                                    │
//! │           compact() → merged L(n+1) SSTs          │
//! │                                                   │
//! │ read.rs → Memtable → L0 → L1 → ... (newest wins)  │
//! │ knn.rs  → HNSW graph → deletion filters → get()   │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Module responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `lib.rs`       | `Store` struct, options, accessors, `reset`, `Drop`  |
//! | [`recovery`]   | Level scan, embedding log replay, HNSW load/rebuild  |
//! | [`write`]      | `put()`, `del()`, flush, embedding bookkeeping       |
//! | [`read`]       | `get()`, `scan()`                                    |
//! | [`compaction`] | Level-triggered k-way merge compaction               |
//! | [`knn`]        | Baseline and HNSW top-k search, index save/load      |
//!
//! ## Durability
//!
//! There is no write-ahead log: the durable state is the last flushed state.
//! Flushes are triggered by the memtable byte budget, and `Drop` makes a
//! best-effort final flush of the memtable and any embeddings that have not
//! reached the log yet. The HNSW index is persisted **only** on explicit
//! request via [`Store::save_hnsw_index`].

mod compaction;
mod knn;
mod read;
mod recovery;
mod write;

use anyhow::Result;
use embedding::{Embedder, EmbeddingLog};
use hnsw::Graph;
use memtable::Memtable;
use sstable::SstHeader;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::error;

/// Sentinel value marking a deleted key. Never valid user data.
pub const TOMBSTONE: &str = "~DELETED~";

/// Default memtable byte budget that triggers a flush.
pub const MAX_MEMTABLE_BYTES: usize = 2 * 1024 * 1024;

/// Maximum size of one SSTable produced by compaction.
pub const MAX_SSTABLE_BYTES: u64 = 2 * 1024 * 1024;

/// Fixed per-table overhead (32-byte header + 10 240-byte bloom filter)
/// counted against the memtable budget when deciding whether to flush.
pub const SST_FIXED_OVERHEAD: usize = 32 + 10_240;

/// Run-count capacity of a level: 4 for L0, `2^(i+1)` for deeper levels.
#[must_use]
pub fn level_capacity(level: usize) -> usize {
    if level == 0 {
        4
    } else {
        1 << (level + 1)
    }
}

/// Construction options for a [`Store`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Root directory for `level-*/` SSTables and `embeddings.bin`.
    pub data_dir: PathBuf,
    /// Where to load the HNSW index from at startup. `None` starts with an
    /// empty graph (rebuilt from recovered embeddings when present).
    pub hnsw_index_dir: Option<PathBuf>,
    /// Memtable byte budget; the default matches [`MAX_MEMTABLE_BYTES`].
    pub memtable_budget: usize,
}

impl Options {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            hnsw_index_dir: None,
            memtable_budget: MAX_MEMTABLE_BYTES,
        }
    }

    #[must_use]
    pub fn hnsw_index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hnsw_index_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn memtable_budget(mut self, bytes: usize) -> Self {
        self.memtable_budget = bytes;
        self
    }
}

/// The public facade: a persistent `u64 -> String` store with an HNSW
/// vector index over per-value embeddings.
///
/// Single-threaded by design — all operations take `&mut self` or `&self`
/// on one thread of control. The only internal concurrency is the parallel
/// HNSW save path, which operates on by-value snapshots.
pub struct Store {
    pub(crate) data_dir: PathBuf,
    pub(crate) hnsw_dir: Option<PathBuf>,

    pub(crate) mem: Memtable,
    /// `levels[0]` may hold overlapping runs; deeper levels are disjoint.
    pub(crate) levels: Vec<Vec<SstHeader>>,
    /// Monotonic flush/compaction counter; also the SSTable filename stem.
    pub(crate) time: u64,
    pub(crate) memtable_budget: usize,

    /// Latest embedding per key (tombstone vector for deleted keys).
    pub(crate) embeddings: HashMap<u64, Vec<f32>>,
    /// Embedding dimension; 0 until discovered.
    pub(crate) dim: usize,
    /// Keys whose embedding changed since it last reached the log.
    pub(crate) dirty: HashSet<u64>,
    pub(crate) log: EmbeddingLog,

    pub(crate) graph: Graph,
    /// Vectors of nodes deleted this session, awaiting persistence.
    pub(crate) pending_deleted: Vec<Vec<f32>>,
    /// Deleted vectors loaded from disk; filters search results.
    pub(crate) loaded_deleted: Vec<Vec<f32>>,

    pub(crate) embedder: Box<dyn Embedder>,
}

impl Store {
    /// Forces a flush of the current memtable. No-op when empty.
    pub fn force_flush(&mut self) -> Result<()> {
        if self.mem.is_empty() {
            return Ok(());
        }
        self.flush()
    }

    /// Wipes everything: memtable, level directories, embedding log, and all
    /// HNSW state (in memory and, when an index directory is configured, on
    /// disk).
    pub fn reset(&mut self) -> Result<()> {
        self.mem.reset();

        for level in 0..self.levels.len() {
            let dir = self.data_dir.join(format!("level-{}", level));
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        self.levels.clear();

        if let Err(e) = self.log.remove() {
            error!("failed to remove embedding log: {e}");
        }
        self.embeddings.clear();
        self.dirty.clear();

        let params = *self.graph.params();
        self.graph = Graph::new(params);
        self.pending_deleted.clear();
        self.loaded_deleted.clear();
        if let Some(dir) = &self.hnsw_dir {
            for name in ["global_header.bin", "deleted_nodes.bin"] {
                let path = dir.join(name);
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
            let nodes = dir.join("nodes");
            if nodes.exists() {
                std::fs::remove_dir_all(&nodes)?;
            }
        }
        Ok(())
    }

    /// Total number of SSTables across all levels.
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    /// Number of runs in one level (0 when the level does not exist).
    #[must_use]
    pub fn level_len(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, |l| l.len())
    }

    /// Number of populated levels.
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Current memtable byte footprint.
    #[must_use]
    pub fn memtable_size(&self) -> usize {
        self.mem.byte_size()
    }

    /// Discovered embedding dimension (0 while unknown).
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// HNSW target degree, exposed for harnesses.
    #[must_use]
    pub fn hnsw_m(&self) -> usize {
        self.graph.params().m
    }

    /// HNSW construction beam width, exposed for harnesses.
    #[must_use]
    pub fn hnsw_ef_construction(&self) -> usize {
        self.graph.params().ef_construction
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("data_dir", &self.data_dir)
            .field("time", &self.time)
            .field("memtable_entries", &self.mem.len())
            .field("memtable_bytes", &self.mem.byte_size())
            .field("levels", &self.levels.iter().map(|l| l.len()).collect::<Vec<_>>())
            .field("embeddings", &self.embeddings.len())
            .field("dim", &self.dim)
            .field("graph", &self.graph)
            .finish()
    }
}

/// Best-effort durability on drop.
///
/// Any data remaining in the memtable is flushed to a final L0 run, and
/// embeddings that never reached the log are appended. Errors are logged and
/// swallowed because `Drop` cannot propagate them. The HNSW index is *not*
/// saved here — persistence of the graph is always explicit.
impl Drop for Store {
    fn drop(&mut self) {
        if !self.mem.is_empty() {
            if let Err(e) = self.flush() {
                error!("final flush on drop failed: {e:#}");
            }
        }
        if self.dim > 0 && !self.dirty.is_empty() {
            let records: Vec<(u64, &[f32])> = self
                .dirty
                .iter()
                .filter_map(|k| self.embeddings.get(k).map(|v| (*k, v.as_slice())))
                .filter(|(_, v)| !v.is_empty())
                .collect();
            if let Err(e) = self.log.append(self.dim, records) {
                error!("final embedding append on drop failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests;
