//! # Size-Classed Slab Allocator
//!
//! Purpose: Hand out value buffers from a small set of fixed-size classes so
//! repeated `set` churn reuses allocations instead of hitting the global
//! allocator on every call.
//!
//! ## Design Principles
//! 1. **Fixed Classes**: Buffers round up to the smallest class that fits;
//!    anything larger than the biggest class bypasses pooling entirely.
//! 2. **Single Lock**: One mutex serializes `allocate`/`free`/`defragment`.
//!    Contention is accepted in exchange for a simple, obviously-correct
//!    implementation (see the crate-level concurrency notes).
//! 3. **Bounded Free Lists**: Each class caps how many buffers it will hold
//!    onto, so a burst of large deletes can't grow the allocator's own
//!    footprint without bound.

use std::collections::VecDeque;

use parking_lot::Mutex;

use hkv_common::config::{DEFAULT_SLAB_FREE_LIST_CAP, SLAB_CLASSES};

struct Class {
    chunk_size: usize,
    free_list: VecDeque<Vec<u8>>,
}

struct Inner {
    classes: Vec<Class>,
    free_list_cap: usize,
    allocations: u64,
    pool_hits: u64,
    oversized: u64,
}

impl Inner {
    fn class_for(&self, size: usize) -> Option<usize> {
        self.classes.iter().position(|c| c.chunk_size >= size)
    }
}

/// Counters describing allocator activity, exposed for metrics/diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlabStats {
    /// Total `allocate` calls served.
    pub allocations: u64,
    /// Allocations satisfied from a class free list rather than freshly.
    pub pool_hits: u64,
    /// Allocations that exceeded every class and were not pooled.
    pub oversized: u64,
    /// Buffers currently sitting in free lists, summed across classes.
    pub pooled: usize,
}

/// Size-classed buffer pool. Thread-safe: all operations take a single
/// internal mutex.
pub struct SlabAllocator {
    inner: Mutex<Inner>,
}

impl SlabAllocator {
    /// Builds an allocator using the default size classes and free-list
    /// capacity.
    pub fn new() -> Self {
        Self::with_classes(&SLAB_CLASSES, DEFAULT_SLAB_FREE_LIST_CAP)
    }

    /// Builds an allocator with explicit size classes (must be ascending)
    /// and per-class free-list capacity.
    pub fn with_classes(classes: &[usize], free_list_cap: usize) -> Self {
        let classes = classes
            .iter()
            .map(|&chunk_size| Class {
                chunk_size,
                free_list: VecDeque::new(),
            })
            .collect();
        SlabAllocator {
            inner: Mutex::new(Inner {
                classes,
                free_list_cap,
                allocations: 0,
                pool_hits: 0,
                oversized: 0,
            }),
        }
    }

    /// Returns a buffer with length exactly `size`, sourced from a class
    /// free list when possible. Buffers larger than every class are
    /// allocated fresh and never pooled.
    pub fn allocate(&self, size: usize) -> Vec<u8> {
        let mut inner = self.inner.lock();
        inner.allocations += 1;

        let Some(class_idx) = inner.class_for(size) else {
            inner.oversized += 1;
            return vec![0u8; size];
        };

        if let Some(mut buf) = inner.classes[class_idx].free_list.pop_front() {
            inner.pool_hits += 1;
            buf.clear();
            buf.resize(size, 0);
            return buf;
        }

        let chunk_size = inner.classes[class_idx].chunk_size;
        let mut buf = Vec::with_capacity(chunk_size);
        buf.resize(size, 0);
        buf
    }

    /// Returns a buffer to its class free list for reuse, if its capacity
    /// matches a known class and that class's free list has room.
    /// Buffers that don't match any class (oversized allocations) are
    /// simply dropped.
    pub fn free(&self, buffer: Vec<u8>) {
        let mut inner = self.inner.lock();
        let cap = buffer.capacity();
        let free_list_cap = inner.free_list_cap;
        if let Some(class) = inner.classes.iter_mut().find(|c| c.chunk_size == cap) {
            if class.free_list.len() < free_list_cap {
                class.free_list.push_back(buffer);
            }
        }
    }

    /// Trims free lists when total pooled buffers exceed an internal
    /// threshold, releasing memory back to the global allocator. Cheap
    /// enough to call opportunistically from the TTL expirer's tick.
    pub fn defragment(&self) {
        const DEFRAGMENT_THRESHOLD: usize = 3000;
        let mut inner = self.inner.lock();
        let total: usize = inner.classes.iter().map(|c| c.free_list.len()).sum();
        if total <= DEFRAGMENT_THRESHOLD {
            return;
        }
        for class in inner.classes.iter_mut() {
            let keep = class.free_list.len() / 2;
            class.free_list.truncate(keep);
        }
    }

    /// Snapshot of allocator counters.
    pub fn stats(&self) -> SlabStats {
        let inner = self.inner.lock();
        SlabStats {
            allocations: inner.allocations,
            pool_hits: inner.pool_hits,
            oversized: inner.oversized,
            pooled: inner.classes.iter().map(|c| c.free_list.len()).sum(),
        }
    }
}

impl Default for SlabAllocator {
    fn default() -> Self {
        Self::new()
    }
}
