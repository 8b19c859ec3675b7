//! # TTL Manager
//!
//! Bridges the ordered expiry index (component B) with the LRU store
//! (component C) and drives the periodic expirer, component D.
//!
//! ## Design Principles
//! 1. **One Lock Pairs Two Structures**: the `key -> expire_at` lookup and
//!    the skip list are always mutated together, under one mutex, so they
//!    can never drift apart (invariant: every lookup entry has exactly one
//!    matching skip list record and vice versa).
//! 2. **Dedicated Expirer Thread**: mirrors the engine's existing
//!    `start_expirer`/`ExpirationHandle` pattern — a plain OS thread, not a
//!    tokio task, so TTL sweeps keep running even if the async runtime is
//!    saturated by connection handlers.
//! 3. **No Simultaneous Cross-Lock Hold**: the expirer never holds the TTL
//!    lock and the LRU lock at the same time. It decides under the TTL
//!    lock, deletes from the LRU store with that lock released, then
//!    re-acquires the TTL lock to commit — trading a narrow reschedule
//!    race (bounded by one tick, already tolerated by the expiry
//!    invariant) for freedom from lock-ordering deadlocks between the
//!    expirer and request handlers.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::lru::LruStore;
use crate::skiplist::ExpiryIndex;
use crate::slab::SlabAllocator;

struct Inner {
    index: ExpiryIndex,
    lookup: HashMap<Arc<[u8]>, Instant, RandomState>,
}

/// Owns the `key -> expire_at` lookup and the ordered expiry index,
/// serialized behind a single lock.
pub struct TtlManager {
    inner: Mutex<Inner>,
}

impl TtlManager {
    /// Creates a manager using the default skip list parameters (level 16,
    /// p=0.25).
    pub fn new() -> Self {
        Self::with_params(16, 0.25)
    }

    /// Creates a manager with explicit skip list parameters.
    pub fn with_params(max_level: usize, p: f64) -> Self {
        TtlManager {
            inner: Mutex::new(Inner {
                index: ExpiryIndex::with_params(max_level, p),
                lookup: HashMap::with_hasher(RandomState::new()),
            }),
        }
    }

    /// Number of keys currently carrying a live TTL.
    pub fn len(&self) -> usize {
        self.inner.lock().lookup.len()
    }

    /// True when no key has a live TTL.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedules `key` to expire at `expire_at`, replacing any prior
    /// schedule for the same key.
    pub fn set_expire(&self, key: Arc<[u8]>, expire_at: Instant) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.lookup.get(key.as_ref()).copied() {
            inner.index.remove(old, &key);
        }
        inner.index.insert(expire_at, Arc::clone(&key));
        inner.lookup.insert(key, expire_at);
    }

    /// Cancels any schedule for `key`. A no-op if `key` has no TTL.
    pub fn delete_expire(&self, key: &[u8]) {
        let mut inner = self.inner.lock();
        if let Some(expire_at) = inner.lookup.remove(key) {
            inner.index.remove(expire_at, key);
        }
    }

    /// Returns whether `key` has a TTL that has already passed. A key
    /// with no TTL never expires.
    pub fn is_expired(&self, key: &[u8]) -> bool {
        let inner = self.inner.lock();
        match inner.lookup.get(key) {
            Some(&expire_at) => Instant::now() > expire_at,
            None => false,
        }
    }

    /// Drains every record whose `expire_at` has already passed, deleting
    /// each key from `lru` and releasing its buffer to `slab`. Stops at
    /// the first record still in the future, or when the index is empty.
    /// Returns the number of keys purged.
    fn sweep(&self, lru: &LruStore, slab: &SlabAllocator) -> usize {
        let mut purged = 0;
        loop {
            let candidate = {
                let inner = self.inner.lock();
                inner.index.peek_earliest()
            };
            let (expire_at, key) = match candidate {
                Some(candidate) => candidate,
                None => break,
            };
            if expire_at > Instant::now() {
                break;
            }

            if let Some(buffer) = lru.delete(&key) {
                if let Ok(buffer) = Arc::try_unwrap(buffer) {
                    slab.free(buffer);
                }
            }

            let mut inner = self.inner.lock();
            if let Some(&current_expire) = inner.lookup.get(key.as_ref()) {
                if current_expire == expire_at {
                    inner.index.remove(expire_at, &key);
                    inner.lookup.remove(key.as_ref());
                    purged += 1;
                }
                // Else: the key was rescheduled between the peek above and
                // this commit; leave the fresh schedule untouched.
            }
        }
        purged
    }

    /// Starts the dedicated expirer thread, ticking at `interval` and
    /// opportunistically defragmenting the slab allocator once per tick.
    pub fn start_expirer(
        self: &Arc<Self>,
        lru: Arc<LruStore>,
        slab: Arc<SlabAllocator>,
        interval: Duration,
    ) -> ExpirerHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let manager = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                let purged = manager.sweep(&lru, &slab);
                if purged > 0 {
                    debug!(purged, "expirer tick purged keys");
                }
                slab.defragment();
            }
        });

        ExpirerHandle {
            stop,
            join: Some(join),
        }
    }
}

impl Default for TtlManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for the background expirer thread. Call `stop` to signal
/// shutdown and join the thread.
pub struct ExpirerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ExpirerHandle {
    /// Signals the expirer to stop and waits for it to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Arc<[u8]> {
        Arc::from(s.as_bytes())
    }

    #[test]
    fn set_then_is_expired_false_before_deadline() {
        let ttl = TtlManager::new();
        ttl.set_expire(key("a"), Instant::now() + Duration::from_secs(60));
        assert!(!ttl.is_expired(b"a"));
        assert_eq!(ttl.len(), 1);
    }

    #[test]
    fn is_expired_true_past_deadline() {
        let ttl = TtlManager::new();
        ttl.set_expire(key("a"), Instant::now() - Duration::from_secs(1));
        assert!(ttl.is_expired(b"a"));
    }

    #[test]
    fn key_without_ttl_never_expires() {
        let ttl = TtlManager::new();
        assert!(!ttl.is_expired(b"missing"));
    }

    #[test]
    fn delete_expire_removes_schedule() {
        let ttl = TtlManager::new();
        ttl.set_expire(key("a"), Instant::now() + Duration::from_secs(60));
        ttl.delete_expire(b"a");
        assert!(!ttl.is_expired(b"a"));
        assert_eq!(ttl.len(), 0);
    }

    #[test]
    fn reschedule_replaces_prior_record() {
        let ttl = TtlManager::new();
        ttl.set_expire(key("a"), Instant::now() - Duration::from_secs(5));
        ttl.set_expire(key("a"), Instant::now() + Duration::from_secs(60));
        assert!(!ttl.is_expired(b"a"));
        assert_eq!(ttl.len(), 1);
    }

    #[test]
    fn sweep_purges_expired_and_cleans_lru() {
        let lru = LruStore::new(10);
        let slab = SlabAllocator::new();
        let ttl = TtlManager::new();

        lru.set(key("a"), slab.allocate(1));
        ttl.set_expire(key("a"), Instant::now() - Duration::from_secs(1));

        lru.set(key("b"), slab.allocate(1));
        ttl.set_expire(key("b"), Instant::now() + Duration::from_secs(60));

        let purged = ttl.sweep(&lru, &slab);
        assert_eq!(purged, 1);
        assert!(!lru.contains(b"a"));
        assert!(lru.contains(b"b"));
        assert_eq!(ttl.len(), 1);
    }

    #[test]
    fn expirer_thread_purges_in_background() {
        let lru = Arc::new(LruStore::new(10));
        let slab = Arc::new(SlabAllocator::new());
        let ttl = Arc::new(TtlManager::new());

        lru.set(key("a"), slab.allocate(1));
        ttl.set_expire(key("a"), Instant::now() + Duration::from_millis(5));

        let handle = ttl.start_expirer(Arc::clone(&lru), Arc::clone(&slab), Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(40));
        handle.stop();

        assert!(!lru.contains(b"a"));
    }
}
