use anyhow::{bail, Result};
use bloom::BloomFilter;
use byteorder::{LittleEndian, WriteBytesExt};
use memtable::Memtable;
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::format::{write_header, RawHeader, HEADER_BYTES, INDEX_ENTRY_BYTES};
use crate::reader::SstHeader;

/// Accumulates sorted entries for one SSTable and writes them out in a
/// single pass.
///
/// Entries must be added in strictly ascending key order — the builder is fed
/// either from a memtable iteration or from a merge stream, both of which are
/// already sorted.
///
/// [`byte_size`](SstBuilder::byte_size) tracks the exact on-disk footprint so
/// compaction can seal an output run when it reaches the size budget.
pub struct SstBuilder {
    timestamp: u64,
    keys: Vec<u64>,
    /// Value-start offsets, relative to the value section. Strictly increasing.
    offsets: Vec<u32>,
    blob: Vec<u8>,
    bloom: BloomFilter,
}

impl SstBuilder {
    /// Creates an empty builder stamped with the given flush/compaction
    /// timestamp.
    #[must_use]
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            keys: Vec::new(),
            offsets: Vec::new(),
            blob: Vec::new(),
            bloom: BloomFilter::new(),
        }
    }

    /// Seals a memtable into a builder.
    #[must_use]
    pub fn from_memtable(mem: &Memtable, timestamp: u64) -> Self {
        let mut b = Self::new(timestamp);
        for (key, value) in mem.iter() {
            b.add(key, value);
        }
        b
    }

    /// Appends an entry. Keys must arrive in strictly ascending order.
    pub fn add(&mut self, key: u64, value: &str) {
        debug_assert!(
            self.keys.last().map_or(true, |&last| key > last),
            "keys must be strictly ascending"
        );
        self.keys.push(key);
        self.offsets.push(self.blob.len() as u32);
        self.blob.extend_from_slice(value.as_bytes());
        self.bloom.insert(key);
    }

    /// Number of entries added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Timestamp this run will carry.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Exact on-disk size if the builder were finished now.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        HEADER_BYTES
            + bloom::BLOOM_BYTES as u64
            + INDEX_ENTRY_BYTES * self.keys.len() as u64
            + self.blob.len() as u64
    }

    /// Writes the table to `path` and returns its resident header.
    ///
    /// The file is written to a `.tmp` sibling, fsynced, and atomically
    /// renamed into place, so readers never observe a half-written table.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder is empty or on any I/O failure.
    pub fn finish(self, path: &Path) -> Result<SstHeader> {
        if self.keys.is_empty() {
            bail!("refusing to write an empty sstable");
        }

        let raw = RawHeader {
            count: self.keys.len() as u32,
            min_key: self.keys[0],
            max_key: *self.keys.last().expect("non-empty"),
            timestamp: self.timestamp,
        };

        let tmp_path = path.with_extension("sst.tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut w = BufWriter::new(file);

            write_header(&mut w, &raw)?;
            self.bloom.write_to(&mut w)?;
            for (key, offset) in self.keys.iter().zip(&self.offsets) {
                w.write_u64::<LittleEndian>(*key)?;
                w.write_u32::<LittleEndian>(*offset)?;
            }
            w.write_all(&self.blob)?;

            w.flush()?;
            w.get_ref().sync_all()?;
        }
        rename(&tmp_path, path)?;

        let index: Vec<(u64, u32)> = self.keys.into_iter().zip(self.offsets).collect();
        Ok(SstHeader::from_parts(
            path.to_path_buf(),
            raw,
            index,
            self.bloom,
            self.blob.len() as u32,
        ))
    }
}
