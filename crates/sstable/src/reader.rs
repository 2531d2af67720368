use anyhow::{bail, Context, Result};
use bloom::BloomFilter;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::format::{data_start, fetch_value, read_header, RawHeader, HEADER_BYTES};

/// The resident portion of an SSTable: fixed header, bloom filter, and key
/// index. Values stay on disk and are fetched one at a time.
///
/// Loading a header reads only the file prefix (header + bloom + index); the
/// value section is never touched. One `SstHeader` per run is kept in the
/// engine's level directory for the lifetime of the run.
pub struct SstHeader {
    path: PathBuf,
    count: u32,
    min_key: u64,
    max_key: u64,
    timestamp: u64,
    /// `(key, value_offset)` pairs, keys ascending, offsets strictly
    /// increasing relative to the value section.
    index: Vec<(u64, u32)>,
    bloom: BloomFilter,
    /// Total length of the value section, used to size the last value.
    value_bytes: u32,
}

impl SstHeader {
    /// Loads the header, bloom filter, and index from an SSTable file.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic is wrong, the file is shorter than its
    /// own index claims, or any read fails.
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open sstable {}", path.display()))?;
        let file_size = file.metadata()?.len();
        let mut r = BufReader::new(file);

        if file_size < HEADER_BYTES + bloom::BLOOM_BYTES as u64 {
            bail!("sstable file too small: {}", path.display());
        }

        let raw = read_header(&mut r)?;
        let bloom = BloomFilter::read_from(&mut r)?;

        let start = data_start(raw.count);
        if file_size < start {
            bail!(
                "sstable {} truncated: index claims {} entries",
                path.display(),
                raw.count
            );
        }

        let mut index = Vec::with_capacity(raw.count as usize);
        for _ in 0..raw.count {
            let key = r.read_u64::<LittleEndian>()?;
            let offset = r.read_u32::<LittleEndian>()?;
            index.push((key, offset));
        }

        Ok(Self {
            path: path.to_path_buf(),
            count: raw.count,
            min_key: raw.min_key,
            max_key: raw.max_key,
            timestamp: raw.timestamp,
            index,
            bloom,
            value_bytes: (file_size - start) as u32,
        })
    }

    /// Builds a header directly from writer state, avoiding a re-read of the
    /// file that was just written.
    pub(crate) fn from_parts(
        path: PathBuf,
        raw: RawHeader,
        index: Vec<(u64, u32)>,
        bloom: BloomFilter,
        value_bytes: u32,
    ) -> Self {
        Self {
            path,
            count: raw.count,
            min_key: raw.min_key,
            max_key: raw.max_key,
            timestamp: raw.timestamp,
            index,
            bloom,
            value_bytes,
        }
    }

    /// Locates a key, returning its `(offset, len)` within the value section.
    ///
    /// The bloom filter is consulted first: a negative answer is definitive
    /// and costs no binary search.
    #[must_use]
    pub fn search_offset(&self, key: u64) -> Option<(u32, u32)> {
        if !self.bloom.may_contain(key) {
            return None;
        }
        let i = self.index.binary_search_by_key(&key, |&(k, _)| k).ok()?;
        Some((self.index[i].1, self.value_len_at(i)))
    }

    /// Reads the value for `key` from disk, or `None` if absent.
    pub fn get(&self, key: u64) -> Result<Option<String>> {
        match self.search_offset(key) {
            Some((offset, len)) => {
                let abs = data_start(self.count) + offset as u64;
                Ok(Some(fetch_value(&self.path, abs, len)?))
            }
            None => Ok(None),
        }
    }

    /// Reads a value located by a prior [`search_offset`](Self::search_offset)
    /// call.
    pub fn fetch(&self, offset: u32, len: u32) -> Result<String> {
        fetch_value(&self.path, data_start(self.count) + offset as u64, len)
    }

    /// Reads the value at index position `i` from disk.
    pub fn value_at(&self, i: usize) -> Result<String> {
        let abs = data_start(self.count) + self.index[i].1 as u64;
        fetch_value(&self.path, abs, self.value_len_at(i))
    }

    /// First index position whose key is >= `key` (== `count` when past the
    /// end).
    #[must_use]
    pub fn lower_bound(&self, key: u64) -> usize {
        self.index.partition_point(|&(k, _)| k < key)
    }

    /// Key at index position `i`.
    #[must_use]
    pub fn key_at(&self, i: usize) -> u64 {
        self.index[i].0
    }

    fn value_len_at(&self, i: usize) -> u32 {
        let start = self.index[i].1;
        let end = if i + 1 < self.index.len() {
            self.index[i + 1].1
        } else {
            self.value_bytes
        };
        end - start
    }

    /// `true` when `key` falls inside this run's `[min_key, max_key]` span.
    #[must_use]
    pub fn covers(&self, key: u64) -> bool {
        self.min_key <= key && key <= self.max_key
    }

    /// `true` when this run's key span intersects `[lo, hi]`.
    #[must_use]
    pub fn overlaps(&self, lo: u64, hi: u64) -> bool {
        !(self.max_key < lo || self.min_key > hi)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn min_key(&self) -> u64 {
        self.min_key
    }

    #[must_use]
    pub fn max_key(&self) -> u64 {
        self.max_key
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SstHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SstHeader")
            .field("path", &self.path)
            .field("count", &self.count)
            .field("min_key", &self.min_key)
            .field("max_key", &self.max_key)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
