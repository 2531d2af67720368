//! Merge iterator over multiple [`SstHeader`]s.
//!
//! Produces `(key, value, timestamp)` triples in ascending key order. When
//! the same key appears in multiple runs, only the copy with the **largest
//! timestamp** is emitted (newest wins); older copies are skipped without
//! reading their values from disk.
//!
//! This is the core primitive for compaction: walk N input runs in sorted
//! order, deduplicate by timestamp, and feed the result into an
//! [`SstBuilder`](crate::SstBuilder).

use anyhow::Result;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::SstHeader;

/// One pending position within a source run.
///
/// Only the key and cursor are stored — the value is read lazily, and only
/// for the entry that wins its key group.
struct HeapEntry {
    key: u64,
    timestamp: u64,
    /// Index into the `sources` slice.
    source: usize,
    /// Position within that source's index.
    pos: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.timestamp == other.timestamp && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the *smallest* key first and,
        // within a key, the *largest* timestamp first. Source index breaks
        // the remaining tie deterministically.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges multiple sorted runs into a single `(key, value, timestamp)`
/// stream, newest copy per key.
pub struct MergeIterator<'a> {
    sources: &'a [SstHeader],
    heap: BinaryHeap<HeapEntry>,
}

impl<'a> MergeIterator<'a> {
    /// Creates a merge over the given runs, seeding the heap with each run's
    /// first key.
    #[must_use]
    pub fn new(sources: &'a [SstHeader]) -> Self {
        let mut heap = BinaryHeap::new();
        for (i, src) in sources.iter().enumerate() {
            if !src.is_empty() {
                heap.push(HeapEntry {
                    key: src.key_at(0),
                    timestamp: src.timestamp(),
                    source: i,
                    pos: 0,
                });
            }
        }
        Self { sources, heap }
    }

    /// Returns the next `(key, value, timestamp)` in ascending key order, or
    /// `None` when all sources are exhausted.
    pub fn next_entry(&mut self) -> Result<Option<(u64, String, u64)>> {
        let winner = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };
        self.advance(winner.source, winner.pos);

        // The heap orders equal keys by timestamp descending, so the first
        // popped entry of a key group is the newest. Drain and discard the
        // stale copies without touching their values.
        while let Some(peek) = self.heap.peek() {
            if peek.key != winner.key {
                break;
            }
            let stale = self.heap.pop().expect("peeked entry");
            self.advance(stale.source, stale.pos);
        }

        let value = self.sources[winner.source].value_at(winner.pos)?;
        Ok(Some((winner.key, value, winner.timestamp)))
    }

    /// Collects all remaining entries. Test and small-run convenience.
    pub fn collect_all(&mut self) -> Result<Vec<(u64, String, u64)>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next_entry()? {
            out.push(entry);
        }
        Ok(out)
    }

    fn advance(&mut self, source: usize, pos: usize) {
        let src = &self.sources[source];
        let next = pos + 1;
        if next < src.len() {
            self.heap.push(HeapEntry {
                key: src.key_at(next),
                timestamp: src.timestamp(),
                source,
                pos: next,
            });
        }
    }
}
