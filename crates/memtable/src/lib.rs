//! # Memtable — Skiplist Write Buffer
//!
//! The in-memory, ordered write buffer of the LSM tree. Every mutation lands
//! here first; once the buffer's byte footprint crosses the engine's flush
//! threshold it is sealed into an immutable SSTable and reset.
//!
//! The structure is a classic skiplist: each node carries a tower of forward
//! pointers, with tower heights drawn from a geometric distribution
//! (p = 0.5, capped at [`MAX_LEVEL`]). Nodes live in an arena (`Vec`) and the
//! forward pointers are arena indices, so there is no pointer chasing through
//! owned boxes and no unsafe code. Head and tail sentinels are always
//! present; user keys are strictly increasing along level 0.
//!
//! Tombstones are not interpreted here — a deletion marker is stored like any
//! other value and it is the engine's job to give it meaning.
//!
//! ## Byte accounting
//!
//! Each resident entry is charged `KEY_OVERHEAD + value_len` bytes, matching
//! what the entry will occupy in an SSTable (8-byte key + 4-byte offset in
//! the index, plus the value blob). Updates adjust the counter by the length
//! delta only.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Maximum tower height. With p = 0.5 this comfortably covers billions of
/// entries.
pub const MAX_LEVEL: usize = 32;

/// Probability of promoting a node one more level.
const P: f64 = 0.5;

/// Bytes charged per entry on top of the value itself (key + index offset).
pub const KEY_OVERHEAD: usize = 12;

/// Arena index of the head sentinel.
const HEAD: usize = 0;
/// Arena index of the tail sentinel.
const TAIL: usize = 1;

struct Node {
    key: u64,
    value: String,
    /// `forward[i]` is the arena index of the next node at level `i`.
    forward: Vec<usize>,
}

/// An ordered `u64 -> String` map backed by a skiplist.
pub struct Memtable {
    arena: Vec<Node>,
    /// Reusable arena slots from removed nodes.
    free: Vec<usize>,
    /// Highest level currently in use (0-based).
    cur_max_level: usize,
    entries: usize,
    bytes: usize,
    rng: StdRng,
}

impl Memtable {
    /// Creates an empty memtable.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates an empty memtable with a caller-supplied RNG. Deterministic
    /// tower heights make structural tests reproducible.
    #[must_use]
    pub fn with_rng(rng: StdRng) -> Self {
        let head = Node {
            key: 0,
            value: String::new(),
            forward: vec![TAIL; MAX_LEVEL],
        };
        let tail = Node {
            key: u64::MAX,
            value: String::new(),
            forward: Vec::new(),
        };
        Self {
            arena: vec![head, tail],
            free: Vec::new(),
            cur_max_level: 0,
            entries: 0,
            bytes: 0,
            rng,
        }
    }

    /// Inserts or updates a key. Existing keys have their value replaced in
    /// place and the byte counter adjusted by the length delta.
    pub fn insert(&mut self, key: u64, value: String) {
        let mut update = [HEAD; MAX_LEVEL];
        let mut cur = HEAD;
        for i in (0..=self.cur_max_level).rev() {
            loop {
                let next = self.arena[cur].forward[i];
                if next != TAIL && self.arena[next].key < key {
                    cur = next;
                } else {
                    break;
                }
            }
            update[i] = cur;
        }

        let candidate = self.arena[cur].forward[0];
        if candidate != TAIL && self.arena[candidate].key == key {
            let old_len = self.arena[candidate].value.len();
            self.bytes = self.bytes - old_len + value.len();
            self.arena[candidate].value = value;
            return;
        }

        let level = self.random_level();
        if level > self.cur_max_level {
            // `update` entries above the old top were never touched by the
            // search and still point at the head sentinel.
            self.cur_max_level = level;
        }

        self.bytes += KEY_OVERHEAD + value.len();
        self.entries += 1;

        let mut forward = vec![TAIL; level + 1];
        for (i, fwd) in forward.iter_mut().enumerate() {
            *fwd = self.arena[update[i]].forward[i];
        }
        let idx = self.alloc(Node {
            key,
            value,
            forward,
        });
        for i in 0..=level {
            self.arena[update[i]].forward[i] = idx;
        }
    }

    /// Looks up a key. Returns `None` when absent; a stored tombstone is
    /// returned verbatim.
    #[must_use]
    pub fn search(&self, key: u64) -> Option<&str> {
        let mut cur = HEAD;
        for i in (0..=self.cur_max_level).rev() {
            loop {
                let next = self.arena[cur].forward[i];
                if next != TAIL && self.arena[next].key < key {
                    cur = next;
                } else {
                    break;
                }
            }
        }
        let candidate = self.arena[cur].forward[0];
        if candidate != TAIL && self.arena[candidate].key == key {
            Some(&self.arena[candidate].value)
        } else {
            None
        }
    }

    /// Physically removes a key. Returns `false` when the key is absent.
    pub fn remove(&mut self, key: u64) -> bool {
        let mut update = [HEAD; MAX_LEVEL];
        let mut cur = HEAD;
        for i in (0..=self.cur_max_level).rev() {
            loop {
                let next = self.arena[cur].forward[i];
                if next != TAIL && self.arena[next].key < key {
                    cur = next;
                } else {
                    break;
                }
            }
            update[i] = cur;
        }

        let target = self.arena[cur].forward[0];
        if target == TAIL || self.arena[target].key != key {
            return false;
        }

        for i in 0..=self.cur_max_level {
            if self.arena[update[i]].forward[i] != target {
                break;
            }
            let successor = self.arena[target].forward[i];
            self.arena[update[i]].forward[i] = successor;
        }

        self.bytes -= KEY_OVERHEAD + self.arena[target].value.len();
        self.entries -= 1;
        self.arena[target].value = String::new();
        self.free.push(target);

        while self.cur_max_level > 0 && self.arena[HEAD].forward[self.cur_max_level] == TAIL {
            self.cur_max_level -= 1;
        }
        true
    }

    /// Collects all entries with keys in `[lo, hi]`, in ascending key order.
    #[must_use]
    pub fn scan(&self, lo: u64, hi: u64) -> Vec<(u64, String)> {
        let mut out = Vec::new();
        let mut cur = self.lower_bound(lo);
        while cur != TAIL && self.arena[cur].key <= hi {
            out.push((self.arena[cur].key, self.arena[cur].value.clone()));
            cur = self.arena[cur].forward[0];
        }
        out
    }

    /// Iterates over all entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        Iter {
            table: self,
            cur: self.arena[HEAD].forward[0],
        }
    }

    /// Clears all entries, keeping allocations where possible.
    pub fn reset(&mut self) {
        self.arena.truncate(2);
        self.arena[HEAD].forward.iter_mut().for_each(|f| *f = TAIL);
        self.free.clear();
        self.cur_max_level = 0;
        self.entries = 0;
        self.bytes = 0;
    }

    /// Current byte footprint under the accounting rule above.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    /// Number of resident entries (sentinels excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    // ---- Internal helpers ----

    /// First node with key >= `key`, or the tail sentinel.
    fn lower_bound(&self, key: u64) -> usize {
        let mut cur = HEAD;
        for i in (0..=self.cur_max_level).rev() {
            loop {
                let next = self.arena[cur].forward[i];
                if next != TAIL && self.arena[next].key < key {
                    cur = next;
                } else {
                    break;
                }
            }
        }
        self.arena[cur].forward[0]
    }

    fn alloc(&mut self, node: Node) -> usize {
        if let Some(idx) = self.free.pop() {
            self.arena[idx] = node;
            idx
        } else {
            self.arena.push(node);
            self.arena.len() - 1
        }
    }

    /// Geometric tower height: 0-based highest level of the new node.
    fn random_level(&mut self) -> usize {
        let mut level = 0;
        while self.rng.gen::<f64>() < P && level + 1 < MAX_LEVEL {
            level += 1;
        }
        level
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memtable")
            .field("entries", &self.entries)
            .field("bytes", &self.bytes)
            .field("levels", &(self.cur_max_level + 1))
            .finish()
    }
}

struct Iter<'a> {
    table: &'a Memtable,
    cur: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (u64, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == TAIL {
            return None;
        }
        let node = &self.table.arena[self.cur];
        self.cur = node.forward[0];
        Some((node.key, node.value.as_str()))
    }
}
