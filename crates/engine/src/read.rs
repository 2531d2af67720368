//! Read path: `get()` and `scan()`.
//!
//! Point lookups consult the memtable first — whatever it holds is
//! authoritative, tombstones included. SSTables are then searched level by
//! level; within a level the copy with the largest timestamp wins, and the
//! first level with a hit ends the search (deeper levels are strictly
//! older).
//!
//! Range scans run a k-way merge over the memtable range and every
//! overlapping run, keyed `(key asc, timestamp desc)`, so the first copy of
//! each key popped from the heap is the freshest. Tombstones are dropped
//! from scan output.

use anyhow::Result;
use sstable::SstHeader;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{Store, TOMBSTONE};

/// Timestamp assigned to memtable entries in the scan merge: fresher than
/// any flushed run.
const MEM_TIME: u64 = u64::MAX;

struct ScanEntry {
    key: u64,
    time: u64,
    /// 0 = memtable, `i + 1` = `tables[i]`.
    source: usize,
    pos: usize,
}

impl PartialEq for ScanEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.time == other.time && self.source == other.source
    }
}

impl Eq for ScanEntry {}

impl PartialOrd for ScanEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScanEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: smallest key first, then largest timestamp.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.time.cmp(&other.time))
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl Store {
    /// Looks up a key. Returns the empty string when the key is absent or
    /// deleted — never an error for a miss.
    pub fn get(&self, key: u64) -> Result<String> {
        if let Some(v) = self.mem.search(key) {
            return Ok(if v == TOMBSTONE {
                String::new()
            } else {
                v.to_string()
            });
        }
        match self.search_tables(key)? {
            Some(v) if v != TOMBSTONE => Ok(v),
            _ => Ok(String::new()),
        }
    }

    /// Raw table lookup: newest copy of `key` across the levels, tombstones
    /// returned verbatim. Shared by `get` and the existence check in `del`
    /// so deletion never re-fires deletion logic.
    pub(crate) fn search_tables(&self, key: u64) -> Result<Option<String>> {
        for level in &self.levels {
            let mut best: Option<(&SstHeader, u32, u32)> = None;
            for h in level {
                if !h.covers(key) {
                    continue;
                }
                if let Some((offset, len)) = h.search_offset(key) {
                    if best.map_or(true, |(b, _, _)| h.timestamp() > b.timestamp()) {
                        best = Some((h, offset, len));
                    }
                }
            }
            if let Some((h, offset, len)) = best {
                return Ok(Some(h.fetch(offset, len)?));
            }
        }
        Ok(None)
    }

    /// Returns all live key-value pairs with keys in `[lo, hi]`, ascending,
    /// freshest copy per key, tombstones excluded.
    pub fn scan(&self, lo: u64, hi: u64) -> Result<Vec<(u64, String)>> {
        if lo > hi {
            return Ok(Vec::new());
        }

        let mem_items = self.mem.scan(lo, hi);

        let tables: Vec<(&SstHeader, usize)> = self
            .levels
            .iter()
            .flatten()
            .filter(|h| h.overlaps(lo, hi))
            .map(|h| (h, h.lower_bound(lo)))
            .filter(|(h, start)| *start < h.len() && h.key_at(*start) <= hi)
            .collect();

        let mut heap: BinaryHeap<ScanEntry> = BinaryHeap::new();
        if let Some((key, _)) = mem_items.first() {
            heap.push(ScanEntry {
                key: *key,
                time: MEM_TIME,
                source: 0,
                pos: 0,
            });
        }
        for (i, (h, start)) in tables.iter().enumerate() {
            heap.push(ScanEntry {
                key: h.key_at(*start),
                time: h.timestamp(),
                source: i + 1,
                pos: *start,
            });
        }

        let mut out = Vec::new();
        let mut last_key: Option<u64> = None;
        while let Some(entry) = heap.pop() {
            if last_key != Some(entry.key) {
                last_key = Some(entry.key);
                let value = if entry.source == 0 {
                    mem_items[entry.pos].1.clone()
                } else {
                    tables[entry.source - 1].0.value_at(entry.pos)?
                };
                if value != TOMBSTONE {
                    out.push((entry.key, value));
                }
            }

            // Advance the popped source.
            let next = entry.pos + 1;
            if entry.source == 0 {
                if next < mem_items.len() {
                    heap.push(ScanEntry {
                        key: mem_items[next].0,
                        time: MEM_TIME,
                        source: 0,
                        pos: next,
                    });
                }
            } else {
                let (h, _) = tables[entry.source - 1];
                if next < h.len() && h.key_at(next) <= hi {
                    heap.push(ScanEntry {
                        key: h.key_at(next),
                        time: h.timestamp(),
                        source: entry.source,
                        pos: next,
                    });
                }
            }
        }

        Ok(out)
    }
}
