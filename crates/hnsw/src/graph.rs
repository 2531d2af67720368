use embedding::{cosine_distance, vectors_close, SEARCH_EPSILON};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use tracing::warn;

/// Stable graph-internal identifier for a node, distinct from the user key.
pub type Label = u64;

/// Build-time graph parameters.
///
/// These are baked into the global header on save and checked (with a
/// warning, not an abort) on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Target degree per layer.
    pub m: usize,
    /// Hard degree cap per layer.
    pub m_max: usize,
    /// Beam width while building.
    pub ef_construction: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            m: 10,
            m_max: 20,
            ef_construction: 100,
        }
    }
}

impl Params {
    /// Level-assignment normalization factor, `1 / ln(M)`.
    #[must_use]
    pub fn m_l(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    /// Beam width for a top-`k` query.
    #[must_use]
    pub fn ef_search(&self, k: usize) -> usize {
        self.ef_construction.max(10 * k)
    }
}

/// One graph node. `connections` always has exactly `max_level + 1` layers.
#[derive(Debug, Clone)]
pub struct Node {
    pub key: u64,
    pub label: Label,
    pub max_level: usize,
    /// Per-layer neighbor labels.
    pub connections: Vec<Vec<Label>>,
    /// Lazy-deletion flag. Dead nodes keep their edges but are invisible to
    /// search and are not persisted.
    pub deleted: bool,
}

/// A distance-tagged label for the search heaps. Ordered by distance
/// (`total_cmp`), label as tie-break so the ordering is total.
#[derive(PartialEq)]
struct DistItem {
    dist: f32,
    label: Label,
}

impl Eq for DistItem {}

impl PartialOrd for DistItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.label.cmp(&other.label))
    }
}

/// The in-memory HNSW graph.
///
/// Vectors are owned by the caller; every search and insert borrows the
/// engine's `key -> vector` map. A label appearing in a neighbor list always
/// refers to an existing (possibly dead) node.
pub struct Graph {
    params: Params,
    nodes: BTreeMap<Label, Node>,
    key_to_label: HashMap<u64, Label>,
    next_label: Label,
    entry_point: Label,
    /// `None` while the graph is empty.
    max_level: Option<usize>,
    rng: StdRng,
}

impl Graph {
    #[must_use]
    pub fn new(params: Params) -> Self {
        Self::with_rng(params, StdRng::from_entropy())
    }

    /// Deterministic level draws for tests.
    #[must_use]
    pub fn with_rng(params: Params, rng: StdRng) -> Self {
        Self {
            params,
            nodes: BTreeMap::new(),
            key_to_label: HashMap::new(),
            next_label: 0,
            entry_point: 0,
            max_level: None,
            rng,
        }
    }

    /// Reassembles a graph from loaded persistence state.
    pub(crate) fn from_loaded(
        params: Params,
        nodes: BTreeMap<Label, Node>,
        entry_point: Label,
        max_level: Option<usize>,
    ) -> Self {
        let key_to_label = nodes.values().map(|n| (n.key, n.label)).collect();
        let next_label = nodes.keys().next_back().map_or(0, |&l| l + 1);
        Self {
            params,
            nodes,
            key_to_label,
            next_label,
            entry_point,
            max_level,
            rng: StdRng::from_entropy(),
        }
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total nodes in the arena, dead ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes not marked deleted.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.nodes.values().filter(|n| !n.deleted).count()
    }

    #[must_use]
    pub fn max_level(&self) -> Option<usize> {
        self.max_level
    }

    #[must_use]
    pub fn entry_point(&self) -> Option<Label> {
        self.max_level.map(|_| self.entry_point)
    }

    #[must_use]
    pub fn label_of(&self, key: u64) -> Option<Label> {
        self.key_to_label.get(&key).copied()
    }

    #[must_use]
    pub fn node(&self, label: Label) -> Option<&Node> {
        self.nodes.get(&label)
    }

    /// Iterates over all nodes in label order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Inserts (or re-inserts) a key whose vector is `vectors[key]`.
    ///
    /// An existing node for the key is marked deleted and the key gets a
    /// fresh label; the dead node's edges are left untouched. Returns the
    /// new label, or `None` when the key has no usable vector.
    pub fn insert(&mut self, key: u64, vectors: &HashMap<u64, Vec<f32>>) -> Option<Label> {
        let query = match vectors.get(&key) {
            Some(v) if !v.is_empty() => v.clone(),
            _ => {
                warn!(key, "hnsw insert skipped: no vector for key");
                return None;
            }
        };

        if let Some(old_label) = self.key_to_label.get(&key).copied() {
            if let Some(old) = self.nodes.get_mut(&old_label) {
                old.deleted = true;
            }
        }

        let label = self.next_label;
        self.next_label += 1;
        self.key_to_label.insert(key, label);

        let node_level = self.random_level();
        self.nodes.insert(
            label,
            Node {
                key,
                label,
                max_level: node_level,
                connections: vec![Vec::new(); node_level + 1],
                deleted: false,
            },
        );

        let graph_level = match self.max_level {
            Some(l) => l,
            None => {
                // First node: it is the entry point and defines the top.
                self.entry_point = label;
                self.max_level = Some(node_level);
                return Some(label);
            }
        };

        // Greedy descent from the top to one level above the node's own top,
        // narrowing the entry point at each layer.
        let mut ep = self.entry_point;
        for level in (node_level + 1..=graph_level).rev() {
            if let Some(&DistRef { label: near, .. }) =
                self.search_layer(ep, &query, level, 1, vectors).first()
            {
                ep = near;
            }
        }

        // Connect from the highest shared layer down to the base.
        for level in (0..=node_level.min(graph_level)).rev() {
            let candidates =
                self.search_layer(ep, &query, level, self.params.ef_construction, vectors);

            let neighbors: Vec<Label> = candidates
                .iter()
                .map(|c| c.label)
                .filter(|&l| l != label)
                .take(self.params.m)
                .collect();

            if let Some(node) = self.nodes.get_mut(&label) {
                node.connections[level] = neighbors.clone();
            }

            for &neighbor in &neighbors {
                let mut added_back_edge = false;
                if let Some(n) = self.nodes.get_mut(&neighbor) {
                    if !n.deleted && n.connections.len() > level {
                        let list = &mut n.connections[level];
                        if !list.contains(&label) {
                            list.push(label);
                            added_back_edge = true;
                        }
                    }
                }
                if added_back_edge {
                    self.prune(neighbor, level, vectors);
                }
            }
            self.prune(label, level, vectors);

            if let Some(nearest) = candidates.first() {
                ep = nearest.label;
            }
        }

        if node_level > graph_level {
            self.max_level = Some(node_level);
            self.entry_point = label;
        }
        Some(label)
    }

    /// Marks the node for `key` deleted. Returns `true` when a live node was
    /// newly marked.
    pub fn mark_deleted(&mut self, key: u64) -> bool {
        if let Some(&label) = self.key_to_label.get(&key) {
            if let Some(node) = self.nodes.get_mut(&label) {
                if !node.deleted {
                    node.deleted = true;
                    return true;
                }
            }
        }
        false
    }

    /// Top candidates for `query`: descend with a frontier of one, beam
    /// search the base layer, then filter out dead nodes and nodes whose
    /// vector matches a persisted deleted vector.
    ///
    /// Returns `(key, distance)` pairs, closest first, up to the beam width —
    /// the caller applies its own value-level filtering and truncates to `k`.
    #[must_use]
    pub fn knn(
        &self,
        query: &[f32],
        k: usize,
        vectors: &HashMap<u64, Vec<f32>>,
        deleted_vectors: &[Vec<f32>],
    ) -> Vec<(u64, f32)> {
        let graph_level = match self.max_level {
            Some(l) if !self.nodes.is_empty() => l,
            _ => return Vec::new(),
        };

        let mut ep = self.entry_point;
        for level in (1..=graph_level).rev() {
            if let Some(near) = self.search_layer(ep, query, level, 1, vectors).first() {
                ep = near.label;
            }
        }

        let base = self.search_layer(ep, query, 0, self.params.ef_search(k), vectors);

        let mut out = Vec::with_capacity(base.len());
        for DistRef { dist, label } in base {
            let node = match self.nodes.get(&label) {
                Some(n) => n,
                None => continue,
            };
            if node.deleted {
                continue;
            }
            if let Some(vec) = vectors.get(&node.key) {
                if deleted_vectors
                    .iter()
                    .any(|d| vectors_close(vec, d, SEARCH_EPSILON))
                {
                    continue;
                }
            }
            out.push((node.key, dist));
        }
        out
    }

    // ---- Internal search ----

    /// Beam search restricted to one layer.
    ///
    /// Returns up to `ef` candidates sorted by ascending distance. A dead or
    /// under-leveled entry point falls back to any valid node at the layer;
    /// missing labels and missing embeddings are skipped silently — they are
    /// repairable inconsistencies, not crashes.
    fn search_layer(
        &self,
        entry: Label,
        query: &[f32],
        level: usize,
        ef: usize,
        vectors: &HashMap<u64, Vec<f32>>,
    ) -> Vec<DistRef> {
        let entry_ok = self
            .nodes
            .get(&entry)
            .map_or(false, |n| !n.deleted && n.max_level >= level);
        let entry = if entry_ok {
            entry
        } else {
            match self
                .nodes
                .values()
                .find(|n| !n.deleted && n.max_level >= level)
            {
                Some(n) => n.label,
                None => return Vec::new(),
            }
        };

        let entry_vec = match self.nodes.get(&entry).and_then(|n| vectors.get(&n.key)) {
            Some(v) => v,
            None => return Vec::new(),
        };
        let entry_dist = cosine_distance(query, entry_vec);

        // Min-heap of nodes still to expand, max-heap of the best `ef` found.
        let mut candidates: BinaryHeap<Reverse<DistItem>> = BinaryHeap::new();
        let mut results: BinaryHeap<DistItem> = BinaryHeap::new();
        let mut visited: HashSet<Label> = HashSet::new();

        candidates.push(Reverse(DistItem {
            dist: entry_dist,
            label: entry,
        }));
        results.push(DistItem {
            dist: entry_dist,
            label: entry,
        });
        visited.insert(entry);

        while let Some(Reverse(current)) = candidates.pop() {
            let furthest = results.peek().map_or(f32::MAX, |r| r.dist);
            if current.dist > furthest && results.len() >= ef {
                break;
            }

            let node = match self.nodes.get(&current.label) {
                Some(n) => n,
                None => continue,
            };
            if node.connections.len() <= level {
                continue;
            }

            for &neighbor in &node.connections[level] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let n = match self.nodes.get(&neighbor) {
                    Some(n) if !n.deleted => n,
                    _ => continue,
                };
                let vec = match vectors.get(&n.key) {
                    Some(v) => v,
                    None => continue,
                };
                let dist = cosine_distance(query, vec);
                let furthest = results.peek().map_or(f32::MAX, |r| r.dist);
                if results.len() < ef || dist < furthest {
                    candidates.push(Reverse(DistItem {
                        dist,
                        label: neighbor,
                    }));
                    results.push(DistItem {
                        dist,
                        label: neighbor,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<DistRef> = results
            .into_iter()
            .map(|i| DistRef {
                dist: i.dist,
                label: i.label,
            })
            .collect();
        out.sort_by(|a, b| a.dist.total_cmp(&b.dist).then(a.label.cmp(&b.label)));
        out
    }

    /// Re-trims a node's neighbor list at `level` to the `M_max` closest.
    fn prune(&mut self, label: Label, level: usize, vectors: &HashMap<u64, Vec<f32>>) {
        let m_max = self.params.m_max;
        let (own_key, list) = match self.nodes.get(&label) {
            Some(n) if n.connections.len() > level && n.connections[level].len() > m_max => {
                (n.key, n.connections[level].clone())
            }
            _ => return,
        };
        let own_vec = match vectors.get(&own_key) {
            Some(v) => v.clone(),
            None => return,
        };

        let mut scored: Vec<DistRef> = list
            .into_iter()
            .filter_map(|l| {
                let n = self.nodes.get(&l)?;
                if n.deleted {
                    return None;
                }
                let v = vectors.get(&n.key)?;
                Some(DistRef {
                    dist: cosine_distance(&own_vec, v),
                    label: l,
                })
            })
            .collect();
        scored.sort_by(|a, b| a.dist.total_cmp(&b.dist).then(a.label.cmp(&b.label)));
        scored.truncate(m_max);

        if let Some(node) = self.nodes.get_mut(&label) {
            node.connections[level] = scored.into_iter().map(|s| s.label).collect();
        }
    }

    /// Randomized level assignment: `floor(-ln(U) * m_L)`, `U ~ (0, 1]`.
    fn random_level(&mut self) -> usize {
        let u: f64 = self.rng.gen_range(f64::MIN_POSITIVE..=1.0);
        (-u.ln() * self.params.m_l()) as usize
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("active", &self.active_len())
            .field("max_level", &self.max_level)
            .field("next_label", &self.next_label)
            .finish()
    }
}

/// Plain `(dist, label)` pair used outside the heaps.
#[derive(Clone, Copy)]
struct DistRef {
    dist: f32,
    label: Label,
}
