use crate::format::{data_start, HEADER_BYTES, SSTABLE_MAGIC};
use crate::*;
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use memtable::Memtable;
use std::io::{Seek, SeekFrom};
use tempfile::tempdir;

fn sample_memtable() -> Memtable {
    let mut m = Memtable::new();
    m.insert(1, "apple".to_string());
    m.insert(2, "banana".to_string());
    m.insert(3, String::new()); // present but empty value
    m.insert(4, "~DELETED~".to_string()); // tombstone, stored like any value
    m
}

#[test]
fn finish_writes_header_bloom_index_blob() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let builder = SstBuilder::from_memtable(&sample_memtable(), 7);
    let expected_size = builder.byte_size();
    let header = builder.finish(&path)?;

    let meta = std::fs::metadata(&path)?;
    assert_eq!(meta.len(), expected_size);
    assert_eq!(header.len(), 4);
    assert_eq!(header.min_key(), 1);
    assert_eq!(header.max_key(), 4);
    assert_eq!(header.timestamp(), 7);

    // Verify the fixed header on disk.
    let mut f = std::fs::File::open(&path)?;
    let magic = f.read_u32::<LittleEndian>()?;
    let count = f.read_u32::<LittleEndian>()?;
    let min_key = f.read_u64::<LittleEndian>()?;
    let max_key = f.read_u64::<LittleEndian>()?;
    let timestamp = f.read_u64::<LittleEndian>()?;
    assert_eq!(magic, SSTABLE_MAGIC);
    assert_eq!(count, 4);
    assert_eq!(min_key, 1);
    assert_eq!(max_key, 4);
    assert_eq!(timestamp, 7);

    // First index entry sits right after the bloom region.
    f.seek(SeekFrom::Start(HEADER_BYTES + bloom::BLOOM_BYTES as u64))?;
    let first_key = f.read_u64::<LittleEndian>()?;
    let first_offset = f.read_u32::<LittleEndian>()?;
    assert_eq!(first_key, 1);
    assert_eq!(first_offset, 0);

    Ok(())
}

#[test]
fn offsets_are_strictly_increasing_for_nonempty_values() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let mut b = SstBuilder::new(1);
    b.add(10, "aa");
    b.add(20, "bbbb");
    b.add(30, "c");
    b.finish(&path)?;

    let h = SstHeader::load(&path)?;
    let (o1, l1) = h.search_offset(10).unwrap();
    let (o2, l2) = h.search_offset(20).unwrap();
    let (o3, l3) = h.search_offset(30).unwrap();
    assert_eq!((o1, l1), (0, 2));
    assert_eq!((o2, l2), (2, 4));
    assert_eq!((o3, l3), (6, 1));
    Ok(())
}

#[test]
fn empty_builder_refuses_to_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.sst");
    let b = SstBuilder::new(1);
    assert!(b.finish(&path).is_err());
    assert!(!path.exists());
}

#[test]
fn byte_size_matches_file_size() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let mut b = SstBuilder::new(3);
    for i in 0..100u64 {
        b.add(i, &"v".repeat((i % 17) as usize));
    }
    let predicted = b.byte_size();
    b.finish(&path)?;
    assert_eq!(std::fs::metadata(&path)?.len(), predicted);
    assert_eq!(
        predicted,
        data_start(100) + (0..100u64).map(|i| i % 17).sum::<u64>()
    );
    Ok(())
}

#[test]
fn tmp_file_is_cleaned_up_by_rename() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    SstBuilder::from_memtable(&sample_memtable(), 1).finish(&path)?;
    assert!(path.exists());
    assert!(!path.with_extension("sst.tmp").exists());
    Ok(())
}
