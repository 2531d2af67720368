use super::helpers::*;
use crate::{Options, SST_FIXED_OVERHEAD};
use tempfile::tempdir;

// -------------------- LSM recovery --------------------

#[test]
fn drop_flushes_memtable_and_reopen_recovers_values() {
    let dir = tempdir().unwrap();
    {
        let mut store = open_store(dir.path());
        for i in 0..64u64 {
            store.put(i, &text_for(i)).unwrap();
        }
        // No explicit flush: Drop must seal the memtable.
    }
    assert!(count_sst_files(dir.path(), 0) >= 1);

    let store = open_store(dir.path());
    for i in 0..64u64 {
        assert_eq!(store.get(i).unwrap(), text_for(i), "key {}", i);
    }
}

#[test]
fn deletions_survive_restart() {
    let dir = tempdir().unwrap();
    {
        let mut store = open_store(dir.path());
        for i in 0..32u64 {
            store.put(i, &text_for(i)).unwrap();
        }
        for i in 0..16u64 {
            store.del(i).unwrap();
        }
    }

    let store = open_store(dir.path());
    for i in 0..16u64 {
        assert_eq!(store.get(i).unwrap(), "", "key {} should stay deleted", i);
    }
    for i in 16..32u64 {
        assert_eq!(store.get(i).unwrap(), text_for(i), "key {}", i);
    }
}

#[test]
fn timestamps_resume_past_recovered_runs() {
    let dir = tempdir().unwrap();
    {
        let mut store = open_store(dir.path());
        store.put(1, "one").unwrap();
        store.force_flush().unwrap();
        store.put(2, "two").unwrap();
        store.force_flush().unwrap();
    }

    let mut store = open_store(dir.path());
    store.put(3, "three").unwrap();
    store.force_flush().unwrap();

    // The newest run must shadow the recovered ones.
    store.put(1, "one updated").unwrap();
    store.force_flush().unwrap();
    assert_eq!(store.get(1).unwrap(), "one updated");
}

#[test]
fn recovery_spans_multiple_levels() {
    let dir = tempdir().unwrap();
    let budget = SST_FIXED_OVERHEAD + 8 * 1024;
    {
        let mut store = open_store_with(Options::new(dir.path()).memtable_budget(budget));
        for key in 0..300u64 {
            let value = format!("{:08}{}", key, "r".repeat(120));
            store
                .put_with_precomputed_embedding(key, &value, &[])
                .unwrap();
        }
    }

    let store = open_store_with(Options::new(dir.path()).memtable_budget(budget));
    assert!(store.level_count() >= 2);
    for key in (0..300).step_by(23) {
        let got = store.get(key).unwrap();
        assert!(got.starts_with(&format!("{:08}", key)), "key {}", key);
    }
}

// -------------------- Embedding recovery --------------------

#[test]
fn embeddings_recover_and_graph_rebuilds() {
    let dir = tempdir().unwrap();
    {
        let mut store = open_store(dir.path());
        for i in 0..40u64 {
            store.put(i, &text_for(i)).unwrap();
        }
    }

    // No HNSW directory configured: the graph must be rebuilt from the
    // recovered embedding log.
    let store = open_store(dir.path());
    assert_eq!(store.dim(), DIM);

    let hits = store.search_knn_hnsw(&text_for(7), 1).unwrap();
    assert_eq!(hits.first().map(|(k, _)| *k), Some(7));
}

#[test]
fn deleted_embeddings_stay_deleted_after_restart() {
    let dir = tempdir().unwrap();
    {
        let mut store = open_store(dir.path());
        for i in 0..20u64 {
            store.put(i, &text_for(i)).unwrap();
        }
        store.del(3).unwrap();
    }

    let store = open_store(dir.path());
    // The reverse scan must resolve key 3 to its tombstone record.
    let hits = store.search_knn(&text_for(3), 20).unwrap();
    assert!(hits.iter().all(|(k, _)| *k != 3));
}

// -------------------- HNSW index recovery --------------------

#[test]
fn saved_index_loads_at_startup() {
    let dir = tempdir().unwrap();
    let hnsw_dir = dir.path().join("hnsw_data");
    let data_dir = dir.path().join("data");

    {
        let mut store = open_store(&data_dir);
        for i in 0..30u64 {
            store.put(i, &text_for(i)).unwrap();
        }
        store.save_hnsw_index(&hnsw_dir, false).unwrap();
    }

    let store = open_store_with(
        Options::new(&data_dir).hnsw_index_dir(&hnsw_dir),
    );
    let hits = store.search_knn_hnsw(&text_for(11), 1).unwrap();
    assert_eq!(hits.first().map(|(k, _)| *k), Some(11));
}

#[test]
fn reset_clears_disk_and_memory() {
    let dir = tempdir().unwrap();
    let hnsw_dir = dir.path().join("hnsw_data");
    let data_dir = dir.path().join("data");

    let mut store = open_store_with(
        Options::new(&data_dir).hnsw_index_dir(&hnsw_dir),
    );
    for i in 0..50u64 {
        store.put(i, &text_for(i)).unwrap();
    }
    store.force_flush().unwrap();
    store.save_hnsw_index(&hnsw_dir, false).unwrap();

    store.reset().unwrap();

    assert_eq!(store.get(10).unwrap(), "");
    assert!(store.scan(0, 100).unwrap().is_empty());
    assert_eq!(store.sstable_count(), 0);
    assert!(store.search_knn_hnsw(&text_for(10), 3).unwrap().is_empty());
    assert!(!data_dir.join("level-0").exists());
    assert!(!hnsw_dir.join("global_header.bin").exists());
    assert!(!hnsw_dir.join("nodes").exists());

    // The store remains usable after a reset.
    store.put(1, "fresh start").unwrap();
    assert_eq!(store.get(1).unwrap(), "fresh start");
}
