//! # Ordered Expiry Index
//!
//! Provide a probabilistic skip list over `(expire_at, key)` tuples with
//! expected O(log n) insert/remove and O(1) earliest-peek, so the TTL
//! manager can cancel and reschedule individual keys cheaply.
//!
//! ## Design Principles
//! 1. **Index Arena**: Nodes live in a dense `Vec<Option<Node>>` addressed
//!    by index, the same pattern used by the LRU store's recency list, to
//!    avoid raw pointers and keep the structure safe.
//! 2. **Total Order**: Ties in `expire_at` are broken by `key` so a node is
//!    always retrievable by its exact tuple even under identical
//!    timestamps.
//! 3. **Seedable Randomness**: Level selection uses a seedable RNG so tests
//!    can assert on deterministic shapes when needed.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Node stored in the arena; `forward[i]` is the index of the next node at
/// level `i`, or `None` at the tail of that level.
#[derive(Debug)]
struct Node {
    expire_at: Instant,
    key: Arc<[u8]>,
    forward: Vec<Option<usize>>,
}

fn order(a_time: Instant, a_key: &[u8], b_time: Instant, b_key: &[u8]) -> Ordering {
    a_time.cmp(&b_time).then_with(|| a_key.cmp(b_key))
}

/// Probabilistic ordered multiset over `(expire_at, key)` tuples.
///
/// Not thread-safe on its own; callers (the TTL manager) serialize access.
#[derive(Debug)]
pub struct ExpiryIndex {
    arena: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Vec<Option<usize>>,
    level: usize,
    len: usize,
    max_level: usize,
    p: f64,
    rng: StdRng,
}

impl ExpiryIndex {
    /// Creates an index with the default parameters (level 16, p=0.25).
    pub fn new() -> Self {
        Self::with_params(16, 0.25)
    }

    /// Creates an index with explicit max level and promotion probability.
    pub fn with_params(max_level: usize, p: f64) -> Self {
        let max_level = max_level.max(1);
        ExpiryIndex {
            arena: Vec::new(),
            free: Vec::new(),
            head: vec![None; max_level],
            level: 1,
            len: 0,
            max_level,
            p,
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates an index with a deterministic RNG seed, for reproducible
    /// tests.
    pub fn with_seed(max_level: usize, p: f64, seed: u64) -> Self {
        let mut index = Self::with_params(max_level, p);
        index.rng = StdRng::seed_from_u64(seed);
        index
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn forward_of(&self, cur: Option<usize>, level: usize) -> Option<usize> {
        match cur {
            None => self.head.get(level).copied().flatten(),
            Some(idx) => self.arena[idx]
                .as_ref()
                .expect("node exists")
                .forward
                .get(level)
                .copied()
                .flatten(),
        }
    }

    fn set_forward(&mut self, cur: Option<usize>, level: usize, target: Option<usize>) {
        match cur {
            None => self.head[level] = target,
            Some(idx) => {
                self.arena[idx].as_mut().expect("node exists").forward[level] = target;
            }
        }
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while self.rng.gen::<f64>() < self.p && level < self.max_level {
            level += 1;
        }
        level
    }

    fn alloc_node(&mut self, node: Node) -> usize {
        if let Some(idx) = self.free.pop() {
            self.arena[idx] = Some(node);
            idx
        } else {
            self.arena.push(Some(node));
            self.arena.len() - 1
        }
    }

    fn free_node(&mut self, idx: usize) {
        self.arena[idx] = None;
        self.free.push(idx);
    }

    /// Walks top-down and returns the predecessor chain for `(expire_at,
    /// key)` along with the node immediately at or after that position at
    /// level 0.
    fn locate(&self, expire_at: Instant, key: &[u8]) -> (Vec<Option<usize>>, Option<usize>) {
        let mut update = vec![None; self.max_level];
        let mut cur = None;
        for i in (0..self.level).rev() {
            loop {
                match self.forward_of(cur, i) {
                    Some(idx) => {
                        let node = self.arena[idx].as_ref().expect("node exists");
                        if order(node.expire_at, &node.key, expire_at, key) == Ordering::Less {
                            cur = Some(idx);
                            continue;
                        }
                    }
                    None => {}
                }
                break;
            }
            update[i] = cur;
        }
        (update, self.forward_of(cur, 0))
    }

    fn splice(&mut self, expire_at: Instant, key: Arc<[u8]>, mut update: Vec<Option<usize>>) {
        let new_level = self.random_level();
        if new_level > self.level {
            for slot in update.iter_mut().take(new_level).skip(self.level) {
                *slot = None;
            }
            self.level = new_level;
        }

        let idx = self.alloc_node(Node {
            expire_at,
            key,
            forward: vec![None; new_level],
        });

        for i in 0..new_level {
            let next = self.forward_of(update[i], i);
            self.set_forward(Some(idx), i, next);
            self.set_forward(update[i], i, Some(idx));
        }
        self.len += 1;
    }

    /// Inserts `(expire_at, key)`. If a node with the same key is found as
    /// the immediate successor during the ordered descent, it is removed
    /// first (belt-and-braces guard; the normal reschedule path removes
    /// the old record explicitly before calling this).
    ///
    /// Returns whether an existing record for `key` was replaced.
    pub fn insert(&mut self, expire_at: Instant, key: Arc<[u8]>) -> bool {
        let (update, next) = self.locate(expire_at, &key);

        if let Some(idx) = next {
            let existing = self.arena[idx].as_ref().expect("node exists");
            if existing.key.as_ref() == key.as_ref() {
                let existing_time = existing.expire_at;
                self.remove(existing_time, &key);
                let (update, _) = self.locate(expire_at, &key);
                self.splice(expire_at, key, update);
                return true;
            }
        }

        self.splice(expire_at, key, update);
        false
    }

    /// Removes the node matching the full `(expire_at, key)` tuple.
    pub fn remove(&mut self, expire_at: Instant, key: &[u8]) -> bool {
        let (update, next) = self.locate(expire_at, key);
        let idx = match next {
            Some(idx) => idx,
            None => return false,
        };

        let matches = {
            let node = self.arena[idx].as_ref().expect("node exists");
            node.expire_at == expire_at && node.key.as_ref() == key
        };
        if !matches {
            return false;
        }

        let node_level = self.arena[idx].as_ref().expect("node exists").forward.len();
        for i in 0..node_level {
            if self.forward_of(update[i], i) == Some(idx) {
                let next = self.forward_of(Some(idx), i);
                self.set_forward(update[i], i, next);
            }
        }

        self.free_node(idx);
        self.len -= 1;

        while self.level > 1 && self.head[self.level - 1].is_none() {
            self.level -= 1;
        }
        true
    }

    /// Returns the earliest `(expire_at, key)` without removing it.
    pub fn peek_earliest(&self) -> Option<(Instant, Arc<[u8]>)> {
        let idx = self.head[0]?;
        let node = self.arena[idx].as_ref().expect("node exists");
        Some((node.expire_at, Arc::clone(&node.key)))
    }

    /// Removes and returns the earliest `(expire_at, key)`.
    pub fn pop_earliest(&mut self) -> Option<(Instant, Arc<[u8]>)> {
        let (expire_at, key) = self.peek_earliest()?;
        self.remove(expire_at, &key);
        Some((expire_at, key))
    }
}

impl Default for ExpiryIndex {
    fn default() -> Self {
        Self::new()
    }
}
