//! On-disk layout and (de)serialization for the HNSW index.
//!
//! ```text
//! <index_dir>/
//!   global_header.bin            M | M_max | ef_construction | max_level (u32)
//!                                entry_point_label | num_active_nodes (u64)
//!                                dim (u32)
//!   nodes/<label>/header.bin     max_level (u32) | key (u64)
//!   nodes/<label>/edges/<level>.bin
//!                                num_edges (u32) | neighbor_label (u32) × n
//!   deleted_nodes.bin            packed f32 × dim records
//! ```
//!
//! All integers little-endian. Labels are written as `u32` on disk; a
//! runtime label that does not fit is truncated with a warning.
//!
//! Saving happens only on explicit request. Deleted nodes are skipped by the
//! node writer — their vectors land in `deleted_nodes.bin` instead. The
//! parallel mode fans per-node writes across a worker pool sized to the
//! machine, with each worker operating on a by-value snapshot taken before
//! the pool starts; the graph itself is never touched from a worker.
//!
//! Loading is deliberately forgiving: parameter mismatches warn and
//! continue, unreadable nodes or edge files are logged and skipped, and the
//! deletion flag always resets to `false` — reconciliation against
//! `deleted_nodes.bin` happens at search time, never at load time.

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{error, info, warn};

use crate::graph::{Graph, Label, Node, Params};

const GLOBAL_HEADER: &str = "global_header.bin";
const DELETED_NODES: &str = "deleted_nodes.bin";
const NODES_DIR: &str = "nodes";

/// Sentinel written in the `max_level` header field for an empty graph.
const EMPTY_MAX_LEVEL: u32 = u32::MAX;

/// Everything read back from an index directory, ready to be assembled into
/// a [`Graph`].
pub struct LoadResult {
    pub nodes: BTreeMap<Label, Node>,
    pub entry_point: Label,
    pub max_level: Option<usize>,
    pub deleted_vectors: Vec<Vec<f32>>,
    pub header_dim: usize,
}

impl LoadResult {
    /// Builds the in-memory graph from the loaded state.
    #[must_use]
    pub fn into_graph(self, params: Params) -> (Graph, Vec<Vec<f32>>) {
        let (entry_point, max_level) = reconcile_entry_point(&self.nodes, self.entry_point, self.max_level);
        let graph = Graph::from_loaded(params, self.nodes, entry_point, max_level);
        (graph, self.deleted_vectors)
    }
}

/// The entry point recorded in the header must refer to a loaded node at the
/// recorded top level; if it does not (partial save, manual pruning), fall
/// back to the tallest loaded node.
fn reconcile_entry_point(
    nodes: &BTreeMap<Label, Node>,
    entry_point: Label,
    max_level: Option<usize>,
) -> (Label, Option<usize>) {
    if nodes.is_empty() {
        return (0, None);
    }
    let ok = max_level.is_some()
        && nodes
            .get(&entry_point)
            .map_or(false, |n| n.max_level == max_level.unwrap_or(0));
    if ok {
        return (entry_point, max_level);
    }
    let tallest = nodes
        .values()
        .max_by_key(|n| n.max_level)
        .expect("non-empty");
    warn!(
        entry_point,
        fallback = tallest.label,
        "stored entry point unusable, falling back to tallest node"
    );
    (tallest.label, Some(tallest.max_level))
}

/// Flat copy of one node, taken on the calling thread so save workers never
/// read shared graph state.
struct NodeSnapshot {
    label: Label,
    key: u64,
    max_level: usize,
    connections: Vec<Vec<Label>>,
}

/// Saves the graph and the deleted-vector list under `dir`.
///
/// The global header is always written first so a later load can diagnose a
/// partial save. Per-node failures are logged and skipped; they never abort
/// the save.
pub fn save(
    graph: &Graph,
    dir: &Path,
    deleted_vectors: &[Vec<f32>],
    dim: usize,
    parallel: bool,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    let nodes_dir = dir.join(NODES_DIR);
    fs::create_dir_all(&nodes_dir)?;

    write_global_header(graph, dir, dim)
        .with_context(|| format!("write {}", dir.join(GLOBAL_HEADER).display()))?;

    let snapshots: Vec<NodeSnapshot> = graph
        .nodes()
        .filter(|n| !n.deleted)
        .map(|n| NodeSnapshot {
            label: n.label,
            key: n.key,
            max_level: n.max_level,
            connections: n.connections.clone(),
        })
        .collect();

    if parallel {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);
        let next = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    if i >= snapshots.len() {
                        break;
                    }
                    let snap = &snapshots[i];
                    if let Err(e) = write_node(&nodes_dir, snap) {
                        error!(label = snap.label, "failed to save hnsw node: {e:#}");
                    }
                });
            }
        });
    } else {
        for snap in &snapshots {
            if let Err(e) = write_node(&nodes_dir, snap) {
                error!(label = snap.label, "failed to save hnsw node: {e:#}");
            }
        }
    }

    write_deleted_vectors(dir, deleted_vectors, dim)?;

    info!(
        nodes = snapshots.len(),
        deleted = deleted_vectors.len(),
        parallel,
        dir = %dir.display(),
        "saved hnsw index"
    );
    Ok(())
}

fn write_global_header(graph: &Graph, dir: &Path, dim: usize) -> Result<()> {
    let params = graph.params();
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(dir.join(GLOBAL_HEADER))?;
    let mut w = BufWriter::new(file);
    w.write_u32::<LittleEndian>(params.m as u32)?;
    w.write_u32::<LittleEndian>(params.m_max as u32)?;
    w.write_u32::<LittleEndian>(params.ef_construction as u32)?;
    w.write_u32::<LittleEndian>(graph.max_level().map_or(EMPTY_MAX_LEVEL, |l| l as u32))?;
    w.write_u64::<LittleEndian>(graph.entry_point().unwrap_or(0))?;
    w.write_u64::<LittleEndian>(graph.active_len() as u64)?;
    w.write_u32::<LittleEndian>(dim as u32)?;
    w.flush()?;
    Ok(())
}

fn write_node(nodes_dir: &Path, snap: &NodeSnapshot) -> Result<()> {
    let node_dir = nodes_dir.join(snap.label.to_string());
    fs::create_dir_all(&node_dir)?;

    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(node_dir.join("header.bin"))?;
        let mut w = BufWriter::new(file);
        w.write_u32::<LittleEndian>(snap.max_level as u32)?;
        w.write_u64::<LittleEndian>(snap.key)?;
        w.flush()?;
    }

    let edges_dir = node_dir.join("edges");
    fs::create_dir_all(&edges_dir)?;
    for (level, neighbors) in snap.connections.iter().enumerate() {
        if neighbors.is_empty() {
            continue;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(edges_dir.join(format!("{}.bin", level)))?;
        let mut w = BufWriter::new(file);
        w.write_u32::<LittleEndian>(neighbors.len() as u32)?;
        for &neighbor in neighbors {
            if neighbor > u32::MAX as u64 {
                warn!(
                    label = snap.label,
                    neighbor, level, "neighbor label exceeds u32, truncating on disk"
                );
            }
            w.write_u32::<LittleEndian>(neighbor as u32)?;
        }
        w.flush()?;
    }
    Ok(())
}

fn write_deleted_vectors(dir: &Path, deleted_vectors: &[Vec<f32>], dim: usize) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(dir.join(DELETED_NODES))?;
    let mut w = BufWriter::new(file);
    for vec in deleted_vectors {
        if vec.len() != dim {
            error!(
                expected = dim,
                actual = vec.len(),
                "deleted vector dimension mismatch, skipping"
            );
            continue;
        }
        for &x in vec {
            w.write_f32::<LittleEndian>(x)?;
        }
    }
    w.flush()?;
    Ok(())
}

/// Loads an index directory. Returns `Ok(None)` when no index was ever saved
/// there (no global header).
///
/// `params` and `expected_dim` are this build's constants; stored values
/// that disagree produce one warning per parameter and loading continues.
pub fn load(dir: &Path, params: &Params, expected_dim: usize) -> Result<Option<LoadResult>> {
    let header_path = dir.join(GLOBAL_HEADER);
    if !header_path.exists() {
        return Ok(None);
    }

    let mut r = BufReader::new(
        File::open(&header_path).with_context(|| format!("open {}", header_path.display()))?,
    );
    let m = r.read_u32::<LittleEndian>()?;
    let m_max = r.read_u32::<LittleEndian>()?;
    let ef_construction = r.read_u32::<LittleEndian>()?;
    let max_level_raw = r.read_u32::<LittleEndian>()?;
    let entry_point = r.read_u64::<LittleEndian>()?;
    let num_active = r.read_u64::<LittleEndian>()?;
    let dim = r.read_u32::<LittleEndian>()? as usize;

    if m as usize != params.m {
        warn!(stored = m, current = params.m, "hnsw parameter mismatch: M");
    }
    if m_max as usize != params.m_max {
        warn!(
            stored = m_max,
            current = params.m_max,
            "hnsw parameter mismatch: M_max"
        );
    }
    if ef_construction as usize != params.ef_construction {
        warn!(
            stored = ef_construction,
            current = params.ef_construction,
            "hnsw parameter mismatch: ef_construction"
        );
    }
    if expected_dim != 0 && dim != expected_dim {
        warn!(
            stored = dim,
            current = expected_dim,
            "hnsw parameter mismatch: dim"
        );
    }

    let mut nodes = BTreeMap::new();
    let nodes_dir = dir.join(NODES_DIR);
    if nodes_dir.exists() {
        for entry in fs::read_dir(&nodes_dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("unreadable nodes/ entry, skipping: {e}");
                    continue;
                }
            };
            if !entry.path().is_dir() {
                continue;
            }
            let label: Label = match entry.file_name().to_string_lossy().parse() {
                Ok(l) => l,
                Err(_) => {
                    warn!(name = %entry.file_name().to_string_lossy(), "non-numeric node directory, skipping");
                    continue;
                }
            };
            match read_node(&entry.path(), label) {
                Ok(node) => {
                    nodes.insert(label, node);
                }
                Err(e) => {
                    warn!(label, "failed to load hnsw node, skipping: {e:#}");
                }
            }
        }
    }

    if nodes.len() as u64 != num_active {
        warn!(
            loaded = nodes.len(),
            expected = num_active,
            "loaded node count differs from global header"
        );
    }

    let deleted_vectors = read_deleted_vectors(dir, dim)?;

    let max_level = if max_level_raw == EMPTY_MAX_LEVEL {
        None
    } else {
        Some(max_level_raw as usize)
    };

    info!(
        nodes = nodes.len(),
        deleted = deleted_vectors.len(),
        dim,
        dir = %dir.display(),
        "loaded hnsw index"
    );

    Ok(Some(LoadResult {
        nodes,
        entry_point,
        max_level,
        deleted_vectors,
        header_dim: dim,
    }))
}

fn read_node(node_dir: &Path, label: Label) -> Result<Node> {
    let mut r = BufReader::new(File::open(node_dir.join("header.bin"))?);
    let max_level = r.read_u32::<LittleEndian>()? as usize;
    let key = r.read_u64::<LittleEndian>()?;

    let mut connections = vec![Vec::new(); max_level + 1];
    let edges_dir = node_dir.join("edges");
    if edges_dir.exists() {
        for (level, slot) in connections.iter_mut().enumerate() {
            let edge_path = edges_dir.join(format!("{}.bin", level));
            if !edge_path.exists() {
                continue;
            }
            match read_edges(&edge_path) {
                Ok(neighbors) => *slot = neighbors,
                Err(e) => {
                    warn!(label, level, "failed to read edge file, skipping: {e:#}");
                }
            }
        }
    }

    // Deletion state is not persisted per node; reconciliation against the
    // deleted-vector list happens at search time.
    Ok(Node {
        key,
        label,
        max_level,
        connections,
        deleted: false,
    })
}

fn read_edges(path: &Path) -> Result<Vec<Label>> {
    let mut r = BufReader::new(File::open(path)?);
    let count = r.read_u32::<LittleEndian>()?;
    let mut neighbors = Vec::with_capacity(count as usize);
    for _ in 0..count {
        neighbors.push(r.read_u32::<LittleEndian>()? as Label);
    }
    Ok(neighbors)
}

fn read_deleted_vectors(dir: &Path, dim: usize) -> Result<Vec<Vec<f32>>> {
    let path = dir.join(DELETED_NODES);
    if !path.exists() || dim == 0 {
        return Ok(Vec::new());
    }
    let mut r = BufReader::new(File::open(&path)?);
    let mut out = Vec::new();
    loop {
        let mut vec = vec![0.0f32; dim];
        match r.read_f32_into::<LittleEndian>(&mut vec) {
            Ok(()) => out.push(vec),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                warn!("truncated deleted_nodes.bin, stopping: {e}");
                break;
            }
        }
    }
    Ok(out)
}
