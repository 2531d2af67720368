use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Magic identifying a DriftKV SSTable ("DKV1").
pub const SSTABLE_MAGIC: u32 = 0x444b_5631;

/// Fixed header size: magic + count + min_key + max_key + timestamp.
pub const HEADER_BYTES: u64 = 4 + 4 + 8 + 8 + 8;

/// Size of one index entry: key (u64) + value offset (u32).
pub const INDEX_ENTRY_BYTES: u64 = 12;

/// Byte offset of the value section for a table with `count` entries.
#[must_use]
pub fn data_start(count: u32) -> u64 {
    HEADER_BYTES + bloom::BLOOM_BYTES as u64 + INDEX_ENTRY_BYTES * count as u64
}

/// Parsed fixed-size header fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawHeader {
    pub count: u32,
    pub min_key: u64,
    pub max_key: u64,
    pub timestamp: u64,
}

pub(crate) fn write_header<W: Write>(w: &mut W, h: &RawHeader) -> Result<()> {
    w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
    w.write_u32::<LittleEndian>(h.count)?;
    w.write_u64::<LittleEndian>(h.min_key)?;
    w.write_u64::<LittleEndian>(h.max_key)?;
    w.write_u64::<LittleEndian>(h.timestamp)?;
    Ok(())
}

pub(crate) fn read_header<R: Read>(r: &mut R) -> Result<RawHeader> {
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != SSTABLE_MAGIC {
        bail!("bad sstable magic: {:#010x}", magic);
    }
    let count = r.read_u32::<LittleEndian>()?;
    let min_key = r.read_u64::<LittleEndian>()?;
    let max_key = r.read_u64::<LittleEndian>()?;
    let timestamp = r.read_u64::<LittleEndian>()?;
    Ok(RawHeader {
        count,
        min_key,
        max_key,
        timestamp,
    })
}

/// Reads one value from an SSTable file without loading the rest of it.
///
/// `offset` is absolute within the file (value-section start plus the index
/// offset). Out-of-range reads are clamped to the file size; a read past the
/// end of the file yields an error rather than a short string.
pub fn fetch_value(path: &Path, offset: u64, len: u32) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let file_size = f.metadata()?.len();
    if offset >= file_size {
        bail!(
            "value offset {} past end of {} ({} bytes)",
            offset,
            path.display(),
            file_size
        );
    }
    let len = len.min((file_size - offset) as u32);
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    f.read_exact(&mut buf)?;
    String::from_utf8(buf).with_context(|| format!("corrupt value bytes in {}", path.display()))
}
