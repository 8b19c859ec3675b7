//! # Cache
//!
//! Composition root for components A–D: wires the slab allocator, LRU
//! store, and TTL manager together behind the operations the command
//! executor (component E, in `hkv-server`) actually needs, and owns the
//! background expirer's lifetime.
//!
//! ## Design Principles
//! 1. **Pure Composition**: `Cache` holds no state of its own beyond the
//!    three components and the expirer handle; every invariant it
//!    enforces is just "call the right two or three methods in the right
//!    order," matching the coherence rules each component's contract
//!    already documents.
//! 2. **Buffers Always Find Their Way Back**: every path that removes a
//!    value from the LRU store (replace, capacity eviction, explicit
//!    delete, TTL expiry) ends with that buffer handed to the slab
//!    allocator, closing the leak the original implementation had on
//!    `set` replacement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use hkv_common::config::{MAX_KEY_LEN, MAX_VALUE_LEN, SKIPLIST_MAX_LEVEL, SKIPLIST_P};
use hkv_common::{CacheConfig, HkvError, HkvResult};

use crate::lru::LruStore;
use crate::slab::SlabAllocator;
use crate::ttl::{ExpirerHandle, TtlManager};

/// The engine's externally visible surface: get/set/delete plus process
/// lifecycle management for the background expirer.
pub struct Cache {
    lru: Arc<LruStore>,
    ttl: Arc<TtlManager>,
    slab: Arc<SlabAllocator>,
    expirer: Mutex<Option<ExpirerHandle>>,
}

impl Cache {
    /// Builds a cache from `config` and starts its background expirer
    /// immediately.
    pub fn new(config: &CacheConfig) -> Self {
        let lru = Arc::new(LruStore::new(config.capacity));
        let slab = Arc::new(SlabAllocator::new());
        let ttl = Arc::new(TtlManager::with_params(SKIPLIST_MAX_LEVEL, SKIPLIST_P));
        let expirer = ttl.start_expirer(Arc::clone(&lru), Arc::clone(&slab), config.tick);

        Cache {
            lru,
            ttl,
            slab,
            expirer: Mutex::new(Some(expirer)),
        }
    }

    /// Looks up `key`. Observing an expired-but-not-yet-swept entry
    /// deletes it from the LRU store and the TTL manager before reporting
    /// it absent, per the `get`/expiry coherence rule.
    pub fn get(&self, key: &[u8]) -> Option<Arc<Vec<u8>>> {
        if self.ttl.is_expired(key) {
            self.purge(key);
            return None;
        }
        self.lru.get(key)
    }

    /// Stores `value` under `key` with `expire_seconds` from now (`0`
    /// means no expiry), replacing any prior entry. Validates size limits
    /// before touching any component.
    pub fn set(&self, key: Vec<u8>, value: &[u8], expire_seconds: u64) -> HkvResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(HkvError::KeyTooLong);
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(HkvError::ValueTooLong);
        }

        let mut buffer = self.slab.allocate(value.len());
        buffer.copy_from_slice(value);

        let key: Arc<[u8]> = Arc::from(key);
        let outcome = self.lru.set(Arc::clone(&key), buffer);

        if let Some(old) = outcome.replaced {
            self.release(old);
        }
        if let Some((evicted_key, evicted_value)) = outcome.evicted {
            self.ttl.delete_expire(&evicted_key);
            self.release(evicted_value);
        }

        if expire_seconds == 0 {
            self.ttl.delete_expire(&key);
        } else {
            self.ttl
                .set_expire(key, Instant::now() + Duration::from_secs(expire_seconds));
        }

        Ok(())
    }

    /// Removes `key` unconditionally, returning whether it was present.
    pub fn delete(&self, key: &[u8]) -> bool {
        let existed = match self.lru.delete(key) {
            Some(value) => {
                self.release(value);
                true
            }
            None => false,
        };
        self.ttl.delete_expire(key);
        existed
    }

    /// Number of live entries, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    /// Stops the background expirer. Idempotent; safe to call from `Drop`
    /// or an explicit shutdown path.
    pub fn shutdown(&self) {
        if let Some(handle) = self.expirer.lock().take() {
            handle.stop();
        }
    }

    fn purge(&self, key: &[u8]) {
        if let Some(value) = self.lru.delete(key) {
            self.release(value);
        }
        self.ttl.delete_expire(key);
    }

    fn release(&self, value: Arc<Vec<u8>>) {
        if let Ok(buffer) = Arc::try_unwrap(value) {
            self.slab.free(buffer);
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: usize) -> CacheConfig {
        CacheConfig {
            addr: "127.0.0.1:0".to_string(),
            capacity,
            tick: Duration::from_millis(20),
        }
    }

    #[test]
    fn set_then_get_round_trips_bytes() {
        let cache = Cache::new(&config(10));
        cache.set(b"foo".to_vec(), b"bar", 0).unwrap();
        let value = cache.get(b"foo").unwrap();
        assert_eq!(&**value, b"bar");
    }

    #[test]
    fn delete_is_unconditional() {
        let cache = Cache::new(&config(10));
        assert!(!cache.delete(b"ghost"));
        cache.set(b"k".to_vec(), b"v", 0).unwrap();
        assert!(cache.delete(b"k"));
        assert!(cache.get(b"k").is_none());
    }

    #[test]
    fn capacity_eviction_drops_oldest_and_its_ttl() {
        let cache = Cache::new(&config(2));
        cache.set(b"a".to_vec(), b"A", 0).unwrap();
        cache.set(b"b".to_vec(), b"B", 0).unwrap();
        cache.get(b"a").unwrap();
        cache.set(b"c".to_vec(), b"C", 0).unwrap();

        assert!(cache.get(b"b").is_none());
        assert!(cache.get(b"a").is_some());
        assert!(cache.get(b"c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn ttl_expiry_is_observed_on_get() {
        let cache = Cache::new(&config(10));
        cache.set(b"k".to_vec(), b"v", 1).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(b"k").is_none());
    }

    #[test]
    fn rescheduling_to_zero_clears_ttl() {
        let cache = Cache::new(&config(10));
        cache.set(b"k".to_vec(), b"v", 100).unwrap();
        cache.set(b"k".to_vec(), b"v2", 0).unwrap();
        assert!(cache.get(b"k").is_some());
    }

    #[test]
    fn oversized_key_is_rejected() {
        let cache = Cache::new(&config(10));
        let big_key = vec![b'k'; MAX_KEY_LEN + 1];
        assert_eq!(cache.set(big_key, b"v", 0), Err(HkvError::KeyTooLong));
    }

    #[test]
    fn background_expirer_sweeps_without_explicit_get() {
        let cache = Cache::new(&config(10));
        cache.set(b"k".to_vec(), b"v", 1).unwrap();
        std::thread::sleep(Duration::from_millis(1200));
        assert_eq!(cache.len(), 0);
    }
}
