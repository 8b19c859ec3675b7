//! # hkv-engine
//!
//! The in-memory state engine: a size-classed slab allocator, an ordered
//! expiry index, a capacity-bounded LRU store, the TTL manager bridging
//! the two, and the `Cache` composition root the server dispatches
//! against.

pub mod cache;
pub mod lru;
pub mod skiplist;
pub mod slab;
pub mod ttl;

pub use cache::Cache;
pub use lru::{LruStore, SetOutcome};
pub use skiplist::ExpiryIndex;
pub use slab::{SlabAllocator, SlabStats};
pub use ttl::{ExpirerHandle, TtlManager};
