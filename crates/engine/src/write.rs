//! Write path: `put()`, `del()`, `put_with_precomputed_embedding()`, and the
//! internal `flush()`.
//!
//! Every mutation updates three places in lockstep: the embedding map (and
//! its dirty set), the memtable, and the HNSW graph. The memtable is flushed
//! *before* the triggering entry is inserted, so a single entry never splits
//! across two runs.

use anyhow::{bail, Result};
use embedding::{is_tombstone_vector, tombstone_vector, vectors_close, DELETE_EPSILON};
use sstable::SstBuilder;
use std::fs;
use tracing::{error, info, warn};

use crate::{Store, SST_FIXED_OVERHEAD, TOMBSTONE};

impl Store {
    /// Inserts or updates a key.
    ///
    /// The value is embedded through the store's collaborator; the tombstone
    /// sentinel maps to the tombstone vector and an empty value to a zero
    /// vector. When the key overwrites a live vector, the old vector is
    /// queued for deletion persistence and the old graph node dies.
    ///
    /// # Errors
    ///
    /// Returns an error when the embedder produces a vector of the wrong
    /// dimension (the store is left unchanged) or on flush I/O failure.
    pub fn put(&mut self, key: u64, value: &str) -> Result<()> {
        let emb = self.embedding_for_value(key, value)?;

        self.track_replaced_vector(key);
        self.embeddings.insert(key, emb.clone());
        self.dirty.insert(key);

        self.insert_into_memtable(key, value)?;

        if self.dim > 0 {
            if !emb.is_empty() && !is_tombstone_vector(&emb) {
                self.graph.insert(key, &self.embeddings);
            } else {
                // Tombstone or empty value: no new node, and any existing
                // node for the key goes dark.
                self.graph.mark_deleted(key);
            }
        }
        Ok(())
    }

    /// `put` with the embedding computed elsewhere (bulk loads, replayed
    /// traffic). The embedder is not consulted.
    ///
    /// # Errors
    ///
    /// Returns an error when `emb` disagrees with the discovered dimension;
    /// the store is left unchanged.
    pub fn put_with_precomputed_embedding(
        &mut self,
        key: u64,
        value: &str,
        emb: &[f32],
    ) -> Result<()> {
        if !emb.is_empty() {
            if self.dim == 0 {
                self.dim = emb.len();
                info!(dim = self.dim, "embedding dimension set from precomputed vector");
            } else if emb.len() != self.dim {
                bail!(
                    "precomputed embedding dimension mismatch for key {}: expected {}, got {}",
                    key,
                    self.dim,
                    emb.len()
                );
            }
        } else {
            warn!(key, "put_with_precomputed_embedding called with an empty vector");
        }

        self.track_replaced_vector(key);
        self.embeddings.insert(key, emb.to_vec());
        self.dirty.insert(key);

        self.insert_into_memtable(key, value)?;

        if self.dim > 0 {
            if !emb.is_empty() && !is_tombstone_vector(emb) {
                self.graph.insert(key, &self.embeddings);
            } else {
                self.graph.mark_deleted(key);
            }
        }
        Ok(())
    }

    /// Deletes a key. Returns `false` when the key does not exist (a
    /// tombstone in any layer counts as non-existent).
    ///
    /// The key's graph node is marked deleted and its last known vector is
    /// queued for deletion persistence; the memtable receives the tombstone
    /// sentinel and the embedding map the tombstone vector.
    pub fn del(&mut self, key: u64) -> Result<bool> {
        let exists = match self.mem.search(key) {
            Some(v) => v != TOMBSTONE,
            None => self
                .search_tables(key)?
                .map_or(false, |v| v != TOMBSTONE),
        };
        if !exists {
            return Ok(false);
        }

        if self.graph.mark_deleted(key) {
            if let Some(vec) = self.embeddings.get(&key) {
                if !vec.is_empty()
                    && !is_tombstone_vector(vec)
                    && !self.is_tracked_deleted(vec)
                {
                    self.pending_deleted.push(vec.clone());
                }
            }
        }

        if self.dim > 0 {
            self.embeddings.insert(key, tombstone_vector(self.dim));
            self.dirty.insert(key);
        }

        self.insert_into_memtable(key, TOMBSTONE)?;
        Ok(true)
    }

    /// Seals the memtable into a new L0 run.
    ///
    /// Embeddings for every flushed key (live vectors and tombstone vectors
    /// alike) are appended to the log first; a log failure is reported and
    /// the flush continues — the vectors stay dirty and get another chance
    /// on the next flush or on drop.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.mem.is_empty() {
            return Ok(());
        }

        self.time += 1;
        let level0 = self.data_dir.join("level-0");
        fs::create_dir_all(&level0)?;
        let path = level0.join(format!("{}.sst", self.time));

        if self.dim > 0 {
            let records: Vec<(u64, &[f32])> = self
                .mem
                .iter()
                .filter_map(|(k, _)| self.embeddings.get(&k).map(|v| (k, v.as_slice())))
                .filter(|(_, v)| !v.is_empty())
                .collect();
            match self.log.append(self.dim, records) {
                Ok(()) => {
                    for (k, _) in self.mem.iter() {
                        self.dirty.remove(&k);
                    }
                }
                Err(e) => {
                    error!("embedding log append during flush failed: {e}");
                }
            }
        }

        let builder = SstBuilder::from_memtable(&self.mem, self.time);
        let entries = builder.len();
        let header = builder.finish(&path)?;
        info!(
            path = %path.display(),
            entries,
            bytes = self.mem.byte_size(),
            "flushed memtable to L0"
        );

        if self.levels.is_empty() {
            self.levels.push(Vec::new());
        }
        self.levels[0].push(header);
        self.mem.reset();

        self.compact()
    }

    /// Inserts into the memtable, flushing first when the entry would push
    /// the table past its byte budget.
    pub(crate) fn insert_into_memtable(&mut self, key: u64, value: &str) -> Result<()> {
        let projected = match self.mem.search(key) {
            Some(existing) => self.mem.byte_size() - existing.len() + value.len(),
            None => self.mem.byte_size() + memtable::KEY_OVERHEAD + value.len(),
        };
        if projected + SST_FIXED_OVERHEAD > self.memtable_budget && !self.mem.is_empty() {
            self.flush()?;
        }
        self.mem.insert(key, value.to_string());
        Ok(())
    }

    /// Computes the embedding for a value, discovering the dimension on the
    /// first real value.
    fn embedding_for_value(&mut self, key: u64, value: &str) -> Result<Vec<f32>> {
        if value == TOMBSTONE {
            return Ok(if self.dim > 0 {
                tombstone_vector(self.dim)
            } else {
                Vec::new()
            });
        }
        if value.is_empty() {
            return Ok(if self.dim > 0 {
                vec![0.0; self.dim]
            } else {
                Vec::new()
            });
        }
        match self.embedder.embed(value) {
            Some(v) if !v.is_empty() => {
                if self.dim == 0 {
                    self.dim = v.len();
                    info!(dim = self.dim, key, "embedding dimension discovered");
                } else if v.len() != self.dim {
                    bail!(
                        "embedding dimension mismatch for key {}: expected {}, got {}",
                        key,
                        self.dim,
                        v.len()
                    );
                }
                Ok(v)
            }
            _ => {
                warn!(key, "embedder returned nothing, storing zero vector");
                Ok(if self.dim > 0 {
                    vec![0.0; self.dim]
                } else {
                    Vec::new()
                })
            }
        }
    }

    /// When an overwrite replaces a live vector, queue the old vector for
    /// deletion persistence unless an equivalent vector is tracked already.
    fn track_replaced_vector(&mut self, key: u64) {
        let old = match self.embeddings.get(&key) {
            Some(v) if !v.is_empty() && !is_tombstone_vector(v) => v.clone(),
            _ => return,
        };
        if !self.is_tracked_deleted(&old) {
            self.pending_deleted.push(old);
        }
    }

    /// Is an equivalent vector already on the loaded or pending deletion
    /// lists?
    pub(crate) fn is_tracked_deleted(&self, vec: &[f32]) -> bool {
        self.loaded_deleted
            .iter()
            .chain(&self.pending_deleted)
            .any(|d| vectors_close(d, vec, DELETE_EPSILON))
    }
}
