//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk sorted runs for the DriftKV storage engine.
//!
//! When the in-memory [`memtable::Memtable`] exceeds its size threshold the
//! engine seals it into an SSTable. SSTables are *write-once, read-many* —
//! once created they are never modified, only replaced during compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER (32 bytes)                                             │
//! │                                                               │
//! │ magic (u32) | count (u32) | min_key (u64)                     │
//! │ max_key (u64) | timestamp (u64)                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOOM SECTION (exactly 10 240 bytes of raw filter bits)       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION (count × 12 bytes)                              │
//! │                                                               │
//! │ key (u64) | value_offset (u32)                                │
//! │                                                               │
//! │ keys ascending, offsets strictly increasing, offsets are      │
//! │ relative to the start of the value section                    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ VALUE SECTION (concatenated value bytes, no per-value framing)│
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. A value's length is the gap to the next
//! index offset (or to the end of the file for the last entry), so values
//! need no length prefix of their own.
//!
//! The `timestamp` is the engine's monotonic flush/compaction counter and
//! breaks ties when the same key appears in multiple runs: the larger
//! timestamp wins.
//!
//! Readers keep only the header, bloom filter, and index resident
//! ([`SstHeader`]); values are fetched from disk one at a time.

mod format;
mod merge;
mod reader;
mod writer;

pub use format::{data_start, fetch_value, HEADER_BYTES, INDEX_ENTRY_BYTES, SSTABLE_MAGIC};
pub use merge::MergeIterator;
pub use reader::SstHeader;
pub use writer::SstBuilder;

#[cfg(test)]
mod tests;
