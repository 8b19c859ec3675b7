//! # Runtime Configuration
//!
//! Purpose: Centralize the tunables spec'd for the cache engine and server
//! so the binary, tests, and benchmarks all agree on defaults.
//!
//! ## Design Principles
//! 1. **Explicit Defaults**: Every field has a documented default matching
//!    the original service's behavior.
//! 2. **Env-Var First**: No config file format is introduced; `from_env`
//!    reads a handful of environment variables and silently falls back to
//!    defaults on missing or unparsable values, mirroring the original
//!    Go service's lack of a config layer.

use std::time::Duration;

/// Default TCP listen address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:11212";

/// Default maximum number of live entries held by the LRU store.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Slab size classes, ascending.
pub const SLAB_CLASSES: [usize; 5] = [64, 128, 256, 1024, 4096];

/// Per-class free-list capacity.
pub const DEFAULT_SLAB_FREE_LIST_CAP: usize = 1000;

/// Default background expirer tick interval.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Maximum skip list level.
pub const SKIPLIST_MAX_LEVEL: usize = 16;

/// Skip list level promotion probability.
pub const SKIPLIST_P: f64 = 0.25;

/// Maximum key length in bytes, the standard memcache-protocol limit.
pub const MAX_KEY_LEN: usize = 250;

/// Maximum value length in bytes (4 MiB), matching the round-trip bound
/// the wire protocol is tested against.
pub const MAX_VALUE_LEN: usize = 4 * 1024 * 1024;

/// Runtime-tunable subset of the above, overridable via environment
/// variables for the server binary.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TCP listen address (`HKV_ADDR`).
    pub addr: String,
    /// Maximum live entries before LRU eviction kicks in (`HKV_CAPACITY`).
    pub capacity: usize,
    /// Expirer tick interval in milliseconds (`HKV_TICK_MS`).
    pub tick: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            addr: DEFAULT_ADDR.to_string(),
            capacity: DEFAULT_CAPACITY,
            tick: DEFAULT_TICK,
        }
    }
}

impl CacheConfig {
    /// Builds a configuration from environment variables, falling back to
    /// defaults whenever a variable is unset or fails to parse.
    pub fn from_env() -> Self {
        let mut config = CacheConfig::default();

        if let Ok(addr) = std::env::var("HKV_ADDR") {
            if !addr.is_empty() {
                config.addr = addr;
            }
        }

        if let Ok(raw) = std::env::var("HKV_CAPACITY") {
            if let Ok(capacity) = raw.parse::<usize>() {
                config.capacity = capacity;
            }
        }

        if let Ok(raw) = std::env::var("HKV_TICK_MS") {
            if let Ok(millis) = raw.parse::<u64>() {
                config.tick = Duration::from_millis(millis);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = CacheConfig::default();
        assert_eq!(config.addr, "0.0.0.0:11212");
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.tick, Duration::from_secs(1));
    }
}
