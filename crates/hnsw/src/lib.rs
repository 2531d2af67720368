//! # HNSW — Hierarchical Navigable Small World Index
//!
//! The approximate-nearest-neighbor index layered over the DriftKV store.
//!
//! A multi-layer proximity graph: upper layers are sparse and provide
//! long-range hops, the base layer is dense and provides precision. A query
//! descends greedily from the top layer to layer 1 with a frontier of one,
//! then runs a wider beam search on the base layer.
//!
//! ## Ownership model
//!
//! Nodes live in an arena keyed by **label** (a dense, monotonically
//! assigned `u64`) and neighbor lists store labels only — never references.
//! Vectors are *not* stored in the graph: every operation borrows the
//! engine's `key -> vector` map, so the graph holds no duplicate float data
//! and serializes as pure structure.
//!
//! ## Update semantics
//!
//! Overwriting a key marks the old node deleted and inserts a fresh node
//! under a **new label**, leaving the old node's neighbor lists intact.
//! This preserves graph invariants at the cost of gradual dead-node
//! accumulation; dead nodes are skipped by search and dropped at save time.
//!
//! Deletion is lazy twice over: live graphs carry a `deleted` flag, and
//! persisted indexes carry a list of deleted *vectors*
//! (`deleted_nodes.bin`) that search results are filtered against with a
//! small tolerance.

mod graph;
mod persist;

pub use graph::{Graph, Label, Node, Params};
pub use persist::{load, save, LoadResult};

#[cfg(test)]
mod tests;
