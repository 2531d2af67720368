//! Append-only embedding log.
//!
//! File layout (all little-endian):
//!
//! ```text
//! [dim: u64][record]*        record = [key: u64][f32 × dim]
//! ```
//!
//! The log is never rewritten: updates append a fresh record for the key and
//! deletions append a record whose vector is the tombstone (every component
//! `f32::MAX`). The latest record for a key — scanning from the end — is
//! authoritative, which makes recovery a single backwards pass: O(records)
//! time, O(unique keys) extra space.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::is_tombstone_vector;

/// Errors surfaced by the embedding log.
#[derive(Debug, Error)]
pub enum LogError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file's dimension header is unusable.
    #[error("corrupt embedding log: {0}")]
    Corrupt(String),
}

/// Handle to the on-disk embedding log. Cheap to construct; every operation
/// opens the file itself.
pub struct EmbeddingLog {
    path: PathBuf,
}

impl EmbeddingLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Appends records to the log, creating it (with a `dim` header) if
    /// absent.
    ///
    /// Records whose vector length disagrees with `dim` are skipped with a
    /// warning; the write continues with the next record.
    pub fn append<'a>(
        &self,
        dim: usize,
        records: impl IntoIterator<Item = (u64, &'a [f32])>,
    ) -> Result<(), LogError> {
        if dim == 0 {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let at_start = file.seek(SeekFrom::End(0))? == 0;
        let mut w = BufWriter::new(&mut file);
        if at_start {
            w.write_u64::<LittleEndian>(dim as u64)?;
        }

        for (key, vec) in records {
            if vec.len() != dim {
                warn!(
                    key,
                    expected = dim,
                    actual = vec.len(),
                    "embedding dimension mismatch, record skipped"
                );
                continue;
            }
            w.write_u64::<LittleEndian>(key)?;
            for &x in vec {
                w.write_f32::<LittleEndian>(x)?;
            }
        }
        w.flush()?;
        drop(w);
        file.sync_all()?;
        Ok(())
    }

    /// Recovers the latest-per-key state by scanning the log backwards.
    ///
    /// Returns `None` when the log does not exist. Keys whose newest record
    /// carries the tombstone vector are omitted from the map. A trailing
    /// partial record (torn final append) is skipped with a warning.
    pub fn recover(&self) -> Result<Option<(usize, HashMap<u64, Vec<f32>>)>, LogError> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file_size = file.metadata()?.len();
        if file_size < 8 {
            return Err(LogError::Corrupt(format!(
                "{}: too short for a dimension header",
                self.path.display()
            )));
        }
        let dim = file.read_u64::<LittleEndian>()? as usize;
        if dim == 0 || dim > 1 << 20 {
            return Err(LogError::Corrupt(format!(
                "{}: implausible dimension {}",
                self.path.display(),
                dim
            )));
        }

        let block = 8 + 4 * dim as u64;
        let data_bytes = file_size - 8;
        if data_bytes % block != 0 {
            warn!(
                path = %self.path.display(),
                trailing = data_bytes % block,
                "embedding log has a partial trailing record, skipping it"
            );
        }
        let num_blocks = data_bytes / block;

        let mut map = HashMap::new();
        let mut seen: HashSet<u64> = HashSet::new();
        let mut buf = vec![0u8; block as usize];

        for i in (0..num_blocks).rev() {
            file.seek(SeekFrom::Start(8 + i * block))?;
            file.read_exact(&mut buf)?;
            let mut r = &buf[..];
            let key = r.read_u64::<LittleEndian>()?;
            if !seen.insert(key) {
                continue;
            }
            let mut vec = vec![0.0f32; dim];
            r.read_f32_into::<LittleEndian>(&mut vec)?;
            if !is_tombstone_vector(&vec) {
                map.insert(key, vec);
            }
        }

        Ok(Some((dim, map)))
    }

    /// Removes the log file if present.
    pub fn remove(&self) -> Result<(), LogError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
