//! Cold-start recovery.
//!
//! Opening a store rebuilds all in-memory state from disk:
//!
//! 1. Scan `level-*/` directories ascending, loading every `.sst` header and
//!    tracking the largest timestamp so the monotonic counter resumes past
//!    everything already written.
//! 2. Replay the embedding log backwards into the latest-per-key map, which
//!    also fixes the embedding dimension.
//! 3. Load the HNSW index when a directory was configured; when nothing
//!    loads but embeddings were recovered, rebuild the graph by re-inserting
//!    every live embedding.
//!
//! Corrupt SSTables and unreadable HNSW state are logged and skipped, never
//! fatal — recovery always produces a usable (possibly emptier) store.

use anyhow::Result;
use embedding::{is_tombstone_vector, Embedder, EmbeddingLog};
use hnsw::{Graph, Params};
use memtable::Memtable;
use sstable::SstHeader;
use std::collections::{HashMap, HashSet};
use std::fs;
use tracing::{error, info, warn};

use crate::{Options, Store};

impl Store {
    /// Opens (or creates) a store rooted at `options.data_dir`, performing
    /// full recovery.
    ///
    /// The embedder is the store's `text -> vector` collaborator; it is
    /// consulted on every `put` of a fresh value and never during search of
    /// precomputed vectors.
    ///
    /// # Errors
    ///
    /// Returns an error only when the data directory itself cannot be
    /// created or scanned; damaged individual files are skipped with a log
    /// line.
    pub fn open(options: Options, embedder: Box<dyn Embedder>) -> Result<Self> {
        fs::create_dir_all(&options.data_dir)?;

        // 1. Level directories.
        let mut levels: Vec<Vec<SstHeader>> = Vec::new();
        let mut time = 0u64;
        for level in 0.. {
            let dir = options.data_dir.join(format!("level-{}", level));
            if !dir.is_dir() {
                break;
            }
            let mut runs = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().map_or(true, |e| e != "sst") {
                    continue;
                }
                match SstHeader::load(&path) {
                    Ok(h) => {
                        time = time.max(h.timestamp());
                        runs.push(h);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "skipping unreadable sstable: {e:#}");
                    }
                }
            }
            info!(level, runs = runs.len(), "recovered level");
            levels.push(runs);
        }

        // 2. Embedding log.
        let log = EmbeddingLog::new(options.data_dir.join("embeddings.bin"));
        let (dim, embeddings) = match log.recover() {
            Ok(Some((dim, map))) => {
                info!(dim, keys = map.len(), "recovered embedding log");
                (dim, map)
            }
            Ok(None) => (0, HashMap::new()),
            Err(e) => {
                error!("embedding log recovery failed, starting empty: {e}");
                (0, HashMap::new())
            }
        };

        // 3. HNSW index.
        let params = Params::default();
        let mut graph = Graph::new(params);
        let mut loaded_deleted = Vec::new();
        if let Some(dir) = &options.hnsw_index_dir {
            match hnsw::load(dir, &params, dim) {
                Ok(Some(loaded)) => {
                    let (g, dead) = loaded.into_graph(params);
                    graph = g;
                    loaded_deleted = dead;
                }
                Ok(None) => {
                    info!(dir = %dir.display(), "no hnsw index found, starting empty");
                }
                Err(e) => {
                    error!(dir = %dir.display(), "hnsw index load failed, starting empty: {e:#}");
                }
            }
        }

        if graph.is_empty() && !embeddings.is_empty() && dim > 0 {
            info!(
                embeddings = embeddings.len(),
                "no hnsw index loaded, rebuilding graph from recovered embeddings"
            );
            let mut keys: Vec<u64> = embeddings.keys().copied().collect();
            keys.sort_unstable();
            for key in keys {
                let vec = &embeddings[&key];
                if vec.len() == dim && !is_tombstone_vector(vec) {
                    graph.insert(key, &embeddings);
                } else {
                    warn!(key, "skipping rebuild for key with unusable embedding");
                }
            }
        }

        Ok(Self {
            data_dir: options.data_dir,
            hnsw_dir: options.hnsw_index_dir,
            mem: Memtable::new(),
            levels,
            time,
            memtable_budget: options.memtable_budget,
            embeddings,
            dim,
            dirty: HashSet::new(),
            log,
            graph,
            pending_deleted: Vec::new(),
            loaded_deleted,
            embedder,
        })
    }
}
