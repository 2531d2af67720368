//! # Embedding — Vector Collaborators for DriftKV
//!
//! Everything the engine needs to talk about embedding vectors without
//! knowing where they come from:
//!
//! - the [`Embedder`] trait, the opaque `text -> vector` collaborator
//!   injected into the store at construction,
//! - cosine similarity and the tolerance-based vector comparisons used by
//!   the deletion filters,
//! - the tombstone vector convention (every component `f32::MAX`) that marks
//!   a key as deleted inside the append-only log,
//! - the [`EmbeddingLog`] itself, an append-only `(key, vector)` file
//!   recovered by scanning backwards from the end.
//!
//! The embedding *model* is explicitly out of scope. Production callers wrap
//! their model behind [`Embedder`]; tests and the CLI use the deterministic
//! [`HashingEmbedder`].

mod log;

pub use crate::log::{EmbeddingLog, LogError};

/// Component-wise tolerance when deciding whether a stored vector is "the
/// same" as a tracked deleted vector.
pub const DELETE_EPSILON: f32 = 1e-1;

/// Tighter tolerance used on the search hot path when filtering candidates
/// against the loaded deleted-vector list.
pub const SEARCH_EPSILON: f32 = 1e-3;

/// The `embed(text) -> vector` collaborator.
///
/// Implementations must be pure (same text, same vector) and may be
/// expensive. A failed embedding is reported as `None`, never as a panic.
pub trait Embedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// Deterministic embedder for tests and the CLI: hashes character trigrams
/// into a fixed number of buckets and L2-normalizes the histogram.
///
/// Similar texts share trigrams and therefore land close in cosine space,
/// which is all the test scenarios need. Not a substitute for a real model.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "embedding dimension must be positive");
        Self { dim }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.is_empty() {
            return None;
        }
        let mut v = vec![0.0f32; self.dim];
        let bytes = text.as_bytes();
        for window in bytes.windows(3.min(bytes.len())) {
            let bucket = (fnv1a_64(window) % self.dim as u64) as usize;
            v[bucket] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Some(v)
    }
}

/// Cosine similarity, accumulated in f64 and clamped to `[-1, 1]`.
///
/// Mismatched lengths, empty inputs, and (near-)zero norms all yield 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }
    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 0.0;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    sim.clamp(-1.0, 1.0) as f32
}

/// Cosine distance: `1 - cosine_similarity`.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// The deletion marker vector: every component `f32::MAX`.
#[must_use]
pub fn tombstone_vector(dim: usize) -> Vec<f32> {
    vec![f32::MAX; dim]
}

/// `true` when `v` is a (non-empty) tombstone vector.
#[must_use]
pub fn is_tombstone_vector(v: &[f32]) -> bool {
    !v.is_empty() && v.iter().all(|&x| x == f32::MAX)
}

/// Component-wise comparison with tolerance. Vectors of different lengths
/// are never close.
#[must_use]
pub fn vectors_close(a: &[f32], b: &[f32], epsilon: f32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| (x - y).abs() <= epsilon)
}

fn fnv1a_64(data: &[u8]) -> u64 {
    const FNV_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_BASIS;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
