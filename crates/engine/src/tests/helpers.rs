use crate::{Options, Store};
use embedding::HashingEmbedder;
use std::fs;
use std::path::Path;

/// Embedding dimension used across the engine tests.
pub const DIM: usize = 32;

pub fn open_store(data_dir: &Path) -> Store {
    Store::open(
        Options::new(data_dir),
        Box::new(HashingEmbedder::new(DIM)),
    )
    .unwrap()
}

pub fn open_store_with(options: Options) -> Store {
    Store::open(options, Box::new(HashingEmbedder::new(DIM))).unwrap()
}

/// Distinct, embedder-friendly text per key.
pub fn text_for(i: u64) -> String {
    format!(
        "document {} describes topic-{} with detail level {}",
        i,
        i % 13,
        i % 7
    )
}

/// Counts `.sst` files in one on-disk level directory.
pub fn count_sst_files(data_dir: &Path, level: usize) -> usize {
    let dir = data_dir.join(format!("level-{}", level));
    if !dir.exists() {
        return 0;
    }
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}
