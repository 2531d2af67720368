use super::*;
use embedding::cosine_similarity;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use tempfile::tempdir;

fn seeded_graph() -> Graph {
    Graph::with_rng(Params::default(), StdRng::seed_from_u64(42))
}

/// `n` random unit vectors in `dim` dimensions, keyed 0..n.
fn random_vectors(n: u64, dim: usize, seed: u64) -> HashMap<u64, Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|key| {
            let mut v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            for x in &mut v {
                *x /= norm;
            }
            (key, v)
        })
        .collect()
}

fn build(vectors: &HashMap<u64, Vec<f32>>) -> Graph {
    let mut g = seeded_graph();
    let mut keys: Vec<u64> = vectors.keys().copied().collect();
    keys.sort_unstable();
    for key in keys {
        g.insert(key, vectors);
    }
    g
}

/// Exact top-k keys by cosine similarity, ties by ascending key.
fn exact_top_k(query: &[f32], vectors: &HashMap<u64, Vec<f32>>, k: usize) -> Vec<u64> {
    let mut scored: Vec<(u64, f32)> = vectors
        .iter()
        .map(|(&key, v)| (key, cosine_similarity(query, v)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(k).map(|(k, _)| k).collect()
}

// -------------------- Construction --------------------

#[test]
fn empty_graph_returns_no_results() {
    let g = seeded_graph();
    let vectors = HashMap::new();
    assert!(g.knn(&[1.0, 0.0], 5, &vectors, &[]).is_empty());
}

#[test]
fn first_insert_becomes_entry_point() {
    let vectors = random_vectors(1, 4, 1);
    let mut g = seeded_graph();
    let label = g.insert(0, &vectors).unwrap();
    assert_eq!(g.entry_point(), Some(label));
    assert!(g.max_level().is_some());
    assert_eq!(g.active_len(), 1);
}

#[test]
fn insert_without_vector_is_skipped() {
    let mut g = seeded_graph();
    let vectors = HashMap::new();
    assert!(g.insert(7, &vectors).is_none());
    assert!(g.is_empty());
}

#[test]
fn reinsert_allocates_fresh_label_and_kills_old_node() {
    let mut vectors = random_vectors(5, 4, 2);
    let mut g = build(&vectors);

    let old_label = g.label_of(3).unwrap();
    vectors.insert(3, vec![1.0, 0.0, 0.0, 0.0]);
    let new_label = g.insert(3, &vectors).unwrap();

    assert_ne!(old_label, new_label);
    assert!(g.node(old_label).unwrap().deleted);
    assert!(!g.node(new_label).unwrap().deleted);
    assert_eq!(g.label_of(3), Some(new_label));
}

// -------------------- Graph invariants --------------------

#[test]
fn degree_cap_and_neighbor_validity() {
    let vectors = random_vectors(200, 8, 3);
    let g = build(&vectors);
    let params = *g.params();

    for node in g.nodes() {
        assert_eq!(node.connections.len(), node.max_level + 1);
        for (level, neighbors) in node.connections.iter().enumerate() {
            assert!(
                neighbors.len() <= params.m_max,
                "node {} level {} has degree {}",
                node.label,
                level,
                neighbors.len()
            );
            let unique: HashSet<&Label> = neighbors.iter().collect();
            assert_eq!(unique.len(), neighbors.len(), "duplicate neighbors");
            for n in neighbors {
                assert!(g.node(*n).is_some(), "dangling neighbor label {}", n);
                assert_ne!(*n, node.label, "self loop at {}", node.label);
            }
        }
    }
}

#[test]
fn entry_point_is_live_and_tallest() {
    let vectors = random_vectors(100, 8, 4);
    let g = build(&vectors);
    let ep = g.entry_point().unwrap();
    let node = g.node(ep).unwrap();
    assert!(!node.deleted);
    assert_eq!(node.max_level, g.max_level().unwrap());
}

// -------------------- Search quality --------------------

#[test]
fn query_of_stored_vector_returns_its_key_first() {
    let vectors = random_vectors(80, 8, 5);
    let g = build(&vectors);

    for key in [0u64, 17, 42, 79] {
        let hits = g.knn(&vectors[&key], 3, &vectors, &[]);
        assert_eq!(hits.first().map(|h| h.0), Some(key));
    }
}

#[test]
fn recall_against_exact_search_is_high() {
    let vectors = random_vectors(150, 8, 6);
    let g = build(&vectors);

    let mut rng = StdRng::seed_from_u64(99);
    let mut total_overlap = 0usize;
    let queries = 10;
    let k = 10;
    for _ in 0..queries {
        let probe_key = rng.gen_range(0..150u64);
        let query = vectors[&probe_key].clone();
        let exact: HashSet<u64> = exact_top_k(&query, &vectors, k).into_iter().collect();
        let approx: HashSet<u64> = g
            .knn(&query, k, &vectors, &[])
            .into_iter()
            .take(k)
            .map(|(key, _)| key)
            .collect();
        total_overlap += exact.intersection(&approx).count();
    }
    let recall = total_overlap as f64 / (queries * k) as f64;
    assert!(recall >= 0.85, "recall {} below 0.85", recall);
}

// -------------------- Deletion --------------------

#[test]
fn deleted_nodes_are_invisible_to_search() {
    let vectors = random_vectors(50, 8, 7);
    let mut g = build(&vectors);

    assert!(g.mark_deleted(10));
    assert!(!g.mark_deleted(10)); // already dead
    let hits = g.knn(&vectors[&10], 50, &vectors, &[]);
    assert!(hits.iter().all(|(key, _)| *key != 10));
}

#[test]
fn deleted_vector_list_filters_matches() {
    let vectors = random_vectors(50, 8, 8);
    let g = build(&vectors);

    let dead = vec![vectors[&7].clone()];
    let hits = g.knn(&vectors[&7], 50, &vectors, &dead);
    assert!(hits.iter().all(|(key, _)| *key != 7));
    // Without the list the key comes back.
    let hits = g.knn(&vectors[&7], 50, &vectors, &[]);
    assert!(hits.iter().any(|(key, _)| *key == 7));
}

#[test]
fn search_survives_deleted_entry_point() {
    let vectors = random_vectors(40, 8, 9);
    let mut g = build(&vectors);

    let ep = g.entry_point().unwrap();
    let ep_key = g.node(ep).unwrap().key;
    g.mark_deleted(ep_key);

    let probe = (ep_key + 1) % 40;
    let hits = g.knn(&vectors[&probe], 5, &vectors, &[]);
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|(key, _)| *key != ep_key));
}

// -------------------- Persistence --------------------

fn structure(g: &Graph) -> Vec<(Label, u64, usize, Vec<Vec<Label>>)> {
    let mut out: Vec<_> = g
        .nodes()
        .filter(|n| !n.deleted)
        .map(|n| (n.label, n.key, n.max_level, n.connections.clone()))
        .collect();
    out.sort_by_key(|(label, ..)| *label);
    out
}

#[test]
fn save_load_round_trip_preserves_live_structure() {
    let vectors = random_vectors(60, 8, 10);
    let mut g = build(&vectors);

    // Delete two keys, steering clear of the entry point so the stored
    // entry survives the round trip unchanged.
    let ep_key = g.node(g.entry_point().unwrap()).unwrap().key;
    let dead_keys: Vec<u64> = (0..60).filter(|k| *k != ep_key).take(2).collect();
    for &k in &dead_keys {
        g.mark_deleted(k);
    }

    let dir = tempdir().unwrap();
    let dead: Vec<Vec<f32>> = dead_keys.iter().map(|k| vectors[k].clone()).collect();
    save(&g, dir.path(), &dead, 8, false).unwrap();

    let loaded = load(dir.path(), g.params(), 8).unwrap().unwrap();
    assert_eq!(loaded.header_dim, 8);
    let (g2, loaded_dead) = loaded.into_graph(*g.params());

    // Live structure identical; deletion flags reset (dead nodes are simply
    // absent from the saved set).
    assert_eq!(structure(&g), structure(&g2));
    assert_eq!(g2.entry_point(), g.entry_point());
    assert_eq!(g2.max_level(), g.max_level());
    assert_eq!(loaded_dead, dead);

    // next_label continues past everything loaded.
    let max_label = g2.nodes().map(|n| n.label).max().unwrap();
    let mut g2 = g2;
    let mut vectors = vectors;
    vectors.insert(1000, vec![0.5; 8]);
    let fresh = g2.insert(1000, &vectors).unwrap();
    assert!(fresh > max_label);
}

#[test]
fn load_missing_directory_is_none() {
    let dir = tempdir().unwrap();
    let result = load(&dir.path().join("nope"), &Params::default(), 8).unwrap();
    assert!(result.is_none());
}

#[test]
fn load_skips_garbage_node_directories() {
    let vectors = random_vectors(10, 4, 11);
    let g = build(&vectors);

    let dir = tempdir().unwrap();
    save(&g, dir.path(), &[], 4, false).unwrap();

    // Inject a non-numeric directory and a numeric one with no header.
    std::fs::create_dir_all(dir.path().join("nodes/banana")).unwrap();
    std::fs::create_dir_all(dir.path().join("nodes/99999")).unwrap();

    let loaded = load(dir.path(), g.params(), 4).unwrap().unwrap();
    assert_eq!(loaded.nodes.len(), 10);
}

#[test]
fn serial_and_parallel_saves_are_equivalent() {
    let vectors = random_vectors(80, 8, 12);
    let mut g = build(&vectors);
    g.mark_deleted(3);

    let serial_dir = tempdir().unwrap();
    let parallel_dir = tempdir().unwrap();
    let dead = vec![vectors[&3].clone()];
    save(&g, serial_dir.path(), &dead, 8, false).unwrap();
    save(&g, parallel_dir.path(), &dead, 8, true).unwrap();

    // Global header byte-identical.
    let gh_a = std::fs::read(serial_dir.path().join("global_header.bin")).unwrap();
    let gh_b = std::fs::read(parallel_dir.path().join("global_header.bin")).unwrap();
    assert_eq!(gh_a, gh_b);

    // Every node header byte-identical; every edge file set-identical.
    for node in g.nodes().filter(|n| !n.deleted) {
        let rel = format!("nodes/{}", node.label);
        let h_a = std::fs::read(serial_dir.path().join(&rel).join("header.bin")).unwrap();
        let h_b = std::fs::read(parallel_dir.path().join(&rel).join("header.bin")).unwrap();
        assert_eq!(h_a, h_b, "header mismatch for label {}", node.label);

        for (level, neighbors) in node.connections.iter().enumerate() {
            if neighbors.is_empty() {
                continue;
            }
            let e_rel = format!("{}/edges/{}.bin", rel, level);
            let read_set = |root: &std::path::Path| -> HashSet<u32> {
                use byteorder::{LittleEndian, ReadBytesExt};
                let mut r = std::io::Cursor::new(std::fs::read(root.join(&e_rel)).unwrap());
                let count = r.read_u32::<LittleEndian>().unwrap();
                (0..count)
                    .map(|_| r.read_u32::<LittleEndian>().unwrap())
                    .collect()
            };
            assert_eq!(
                read_set(serial_dir.path()),
                read_set(parallel_dir.path()),
                "edge set mismatch for label {} level {}",
                node.label,
                level
            );
        }
    }
}

#[test]
fn load_with_mismatched_params_still_loads() {
    let vectors = random_vectors(20, 4, 13);
    let g = build(&vectors);

    let dir = tempdir().unwrap();
    save(&g, dir.path(), &[], 4, false).unwrap();

    let other = Params {
        m: 16,
        m_max: 32,
        ef_construction: 200,
    };
    let loaded = load(dir.path(), &other, 4).unwrap().unwrap();
    assert_eq!(loaded.nodes.len(), 20);
}
