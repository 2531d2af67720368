//! Level-triggered compaction.
//!
//! A level over its run-count capacity donates runs to the next level down:
//!
//! - **L0** donates *all* of its runs (they may overlap each other).
//! - **L≥1** donates its `excess` oldest runs (smallest timestamps).
//!
//! Every run in the next level whose key range intersects the donated range
//! joins the merge. The k-way merge keeps the newest copy per key, drops
//! tombstones when the output level is the deepest populated one, and seals
//! output runs at the size budget — always on a key boundary, so the
//! non-overlap invariant of L≥1 holds by construction. Inputs are deleted
//! afterwards, and the walk continues downward while the next level
//! overflows.

use anyhow::Result;
use sstable::{MergeIterator, SstBuilder, SstHeader, INDEX_ENTRY_BYTES};
use std::fs;
use tracing::{info, warn};

use crate::{level_capacity, Store, MAX_SSTABLE_BYTES, TOMBSTONE};

impl Store {
    /// Walks the levels top-down, compacting any level over capacity.
    pub(crate) fn compact(&mut self) -> Result<()> {
        let mut level = 0;
        while level < self.levels.len() {
            if self.levels[level].len() > level_capacity(level) {
                self.compact_level(level)?;
            }
            level += 1;
        }
        Ok(())
    }

    fn compact_level(&mut self, level: usize) -> Result<()> {
        // Select donors from `level`.
        let mut donors = std::mem::take(&mut self.levels[level]);
        let selected: Vec<SstHeader> = if level == 0 {
            let taken: Vec<SstHeader> = donors.drain(..).collect();
            self.levels[0] = donors;
            taken
        } else {
            donors.sort_by_key(SstHeader::timestamp);
            let excess = donors.len().saturating_sub(level_capacity(level));
            let rest = donors.split_off(excess);
            self.levels[level] = rest;
            donors
        };
        if selected.is_empty() {
            return Ok(());
        }

        let min_key = selected.iter().map(SstHeader::min_key).min().expect("non-empty");
        let max_key = selected.iter().map(SstHeader::max_key).max().expect("non-empty");

        // Pull in every overlapping run from the next level.
        while self.levels.len() <= level + 1 {
            self.levels.push(Vec::new());
        }
        let next = std::mem::take(&mut self.levels[level + 1]);
        let (overlapping, untouched): (Vec<_>, Vec<_>) = next
            .into_iter()
            .partition(|h| h.overlaps(min_key, max_key));
        self.levels[level + 1] = untouched;

        // Tombstones can be dropped only when nothing deeper could still
        // hold an older live copy.
        let drop_tombstones = self
            .levels
            .iter()
            .skip(level + 2)
            .all(|l| l.is_empty());

        let mut inputs = selected;
        inputs.extend(overlapping);
        info!(
            level,
            inputs = inputs.len(),
            min_key,
            max_key,
            drop_tombstones,
            "compacting"
        );

        let out_dir = self.data_dir.join(format!("level-{}", level + 1));
        fs::create_dir_all(&out_dir)?;

        let mut outputs: Vec<SstHeader> = Vec::new();
        {
            let mut iter = MergeIterator::new(&inputs);
            self.time += 1;
            let mut builder = SstBuilder::new(self.time);
            while let Some((key, value, _)) = iter.next_entry()? {
                if drop_tombstones && value == TOMBSTONE {
                    continue;
                }
                if !builder.is_empty()
                    && builder.byte_size() + INDEX_ENTRY_BYTES + value.len() as u64
                        > MAX_SSTABLE_BYTES
                {
                    let path = out_dir.join(format!("{}.sst", builder.timestamp()));
                    outputs.push(builder.finish(&path)?);
                    self.time += 1;
                    builder = SstBuilder::new(self.time);
                }
                builder.add(key, &value);
            }
            if !builder.is_empty() {
                let path = out_dir.join(format!("{}.sst", builder.timestamp()));
                outputs.push(builder.finish(&path)?);
            }
        }

        // Inputs are fully superseded; remove their files.
        for h in &inputs {
            if let Err(e) = fs::remove_file(h.path()) {
                warn!(path = %h.path().display(), "failed to remove compacted input: {e}");
            }
        }

        info!(level = level + 1, outputs = outputs.len(), "compaction wrote runs");
        self.levels[level + 1].extend(outputs);
        Ok(())
    }
}
