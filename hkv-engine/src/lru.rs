//! # LRU Store
//!
//! Capacity-bounded map with recency order and O(1) move-to-front,
//! component C. A single exclusive lock guards the whole store; `get`
//! takes that lock for its entire duration rather than reading under a
//! shared lock and upgrading to mutate recency, closing the race window
//! described in the crate-level concurrency notes.
//!
//! ## Design Principles
//! 1. **Index Arena**: Entries live in a dense `Vec<Option<Node>>`
//!    addressed by index, with an intrusive doubly-linked recency list
//!    threaded through `prev`/`next`, the same technique used by the
//!    expiry index.
//! 2. **One Lock**: No sharding. Throughput is traded for a store whose
//!    correctness is easy to see; see the crate-level docs for why.
//! 3. **Capacity-Preserving Values**: Values are `Arc<Vec<u8>>` rather
//!    than `Arc<[u8]>` so a buffer's slab-allocated capacity survives
//!    being shared with readers; the allocator identifies pool classes by
//!    capacity and a reslice would destroy that information.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

#[derive(Debug)]
struct Node {
    key: Arc<[u8]>,
    value: Arc<Vec<u8>>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Inner {
    map: HashMap<Arc<[u8]>, usize, RandomState>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Inner {
    fn new(hash_state: RandomState) -> Self {
        Inner {
            map: HashMap::with_hasher(hash_state),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn lru_remove(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().expect("node exists");
            (node.prev, node.next)
        };

        match prev {
            Some(prev_idx) => self.nodes[prev_idx].as_mut().expect("node exists").next = next,
            None => self.head = next,
        }
        match next {
            Some(next_idx) => self.nodes[next_idx].as_mut().expect("node exists").prev = prev,
            None => self.tail = prev,
        }

        let node = self.nodes[idx].as_mut().expect("node exists");
        node.prev = None;
        node.next = None;
    }

    fn lru_push_front(&mut self, idx: usize) {
        let head = self.head;
        {
            let node = self.nodes[idx].as_mut().expect("node exists");
            node.next = head;
            node.prev = None;
        }
        match head {
            Some(head_idx) => self.nodes[head_idx].as_mut().expect("node exists").prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.lru_remove(idx);
        self.lru_push_front(idx);
    }

    fn insert_new(&mut self, key: Arc<[u8]>, value: Arc<Vec<u8>>) -> usize {
        let idx = self.free.pop().unwrap_or_else(|| {
            self.nodes.push(None);
            self.nodes.len() - 1
        });
        self.nodes[idx] = Some(Node {
            key: Arc::clone(&key),
            value,
            prev: None,
            next: None,
        });
        self.lru_push_front(idx);
        self.map.insert(key, idx);
        idx
    }

    fn remove_idx(&mut self, idx: usize) -> (Arc<[u8]>, Arc<Vec<u8>>) {
        self.lru_remove(idx);
        let node = self.nodes[idx].take().expect("node exists");
        self.map.remove(node.key.as_ref());
        self.free.push(idx);
        (node.key, node.value)
    }
}

/// Outcome of a `set`, describing whatever buffer ownership moved back to
/// the caller so it can be released to the slab allocator.
#[derive(Debug, Default)]
pub struct SetOutcome {
    /// The previous value, when `set` replaced an existing key.
    pub replaced: Option<Arc<Vec<u8>>>,
    /// The evicted tail entry, when inserting a new key pushed the store
    /// over capacity.
    pub evicted: Option<(Arc<[u8]>, Arc<Vec<u8>>)>,
}

/// Capacity-bounded, recency-ordered key/value store.
pub struct LruStore {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl LruStore {
    /// Creates a store that evicts the least-recently-used entry once its
    /// size would exceed `capacity`.
    pub fn new(capacity: usize) -> Self {
        LruStore {
            inner: Mutex::new(Inner::new(RandomState::new())),
            capacity: capacity.max(1),
        }
    }

    /// Configured maximum number of live entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// True when the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up `key`, moving it to the head of the recency list on hit.
    /// Takes the store's lock for the whole operation so no writer can
    /// observe the node between lookup and the recency mutation.
    pub fn get(&self, key: &[u8]) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let idx = *inner.map.get(key)?;
        inner.touch(idx);
        let value = Arc::clone(&inner.nodes[idx].as_ref().expect("node exists").value);
        Some(value)
    }

    /// Inserts or replaces `key`. On replacement, the old value is handed
    /// back for the caller to release to the slab allocator; on a new
    /// insert that pushes the store past capacity, the evicted tail is
    /// handed back the same way.
    pub fn set(&self, key: Arc<[u8]>, value: Vec<u8>) -> SetOutcome {
        let value = Arc::new(value);
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.map.get(key.as_ref()) {
            let old = std::mem::replace(
                &mut inner.nodes[idx].as_mut().expect("node exists").value,
                value,
            );
            inner.touch(idx);
            return SetOutcome {
                replaced: Some(old),
                evicted: None,
            };
        }

        inner.insert_new(key, value);
        let evicted = if inner.map.len() > self.capacity {
            inner.tail.map(|idx| inner.remove_idx(idx))
        } else {
            None
        };

        SetOutcome {
            replaced: None,
            evicted,
        }
    }

    /// Removes `key` unconditionally, returning its value if it existed.
    pub fn delete(&self, key: &[u8]) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let idx = *inner.map.get(key)?;
        let (_, value) = inner.remove_idx(idx);
        Some(value)
    }

    /// Removes and returns the least-recently-used entry, for capacity
    /// enforcement and the TTL expirer's cascading cleanup.
    pub fn evict_tail(&self) -> Option<(Arc<[u8]>, Arc<Vec<u8>>)> {
        let mut inner = self.inner.lock();
        let idx = inner.tail?;
        Some(inner.remove_idx(idx))
    }

    /// Returns true if `key` currently has a live entry, without
    /// affecting recency. Used sparingly (tests and invariant checks);
    /// the hot path is `get`.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.lock().map.contains_key(key)
    }
}

impl std::fmt::Debug for LruStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruStore")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Arc<[u8]> {
        Arc::from(s.as_bytes())
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = LruStore::new(10);
        store.set(key("a"), b"1".to_vec());
        let v = store.get(b"a").unwrap();
        assert_eq!(&**v, b"1");
    }

    #[test]
    fn set_replacing_returns_old_value() {
        let store = LruStore::new(10);
        store.set(key("a"), b"1".to_vec());
        let outcome = store.set(key("a"), b"22".to_vec());
        assert_eq!(&**outcome.replaced.unwrap(), b"1");
        assert!(outcome.evicted.is_none());
        assert_eq!(&**store.get(b"a").unwrap(), b"22");
    }

    #[test]
    fn capacity_eviction_removes_least_recently_used() {
        let store = LruStore::new(2);
        store.set(key("a"), b"A".to_vec());
        store.set(key("b"), b"B".to_vec());
        store.get(b"a");
        let outcome = store.set(key("c"), b"C".to_vec());

        let (evicted_key, _) = outcome.evicted.expect("eviction expected");
        assert_eq!(&*evicted_key, b"b");
        assert!(store.get(b"b").is_none());
        assert!(store.get(b"a").is_some());
        assert!(store.get(b"c").is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn delete_unlinks_entry() {
        let store = LruStore::new(10);
        store.set(key("a"), b"1".to_vec());
        let removed = store.delete(b"a").unwrap();
        assert_eq!(&*removed, b"1");
        assert!(store.delete(b"a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn evict_tail_reports_oldest() {
        let store = LruStore::new(10);
        store.set(key("a"), b"1".to_vec());
        store.set(key("b"), b"2".to_vec());
        let (k, v) = store.evict_tail().unwrap();
        assert_eq!(&*k, b"a");
        assert_eq!(&**v, b"1");
    }
}
