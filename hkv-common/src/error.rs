//! # Error Types
//!
//! Purpose: A single error enum shared by the engine, server, and client so
//! call sites can match on well-known failure modes instead of opaque
//! strings.
//!
//! ## Design Principles
//! 1. **One Error Enum**: `HkvError` covers every engine-level failure; the
//!    wire protocol translates it into `CLIENT_ERROR`/`ERROR` text at the
//!    server boundary rather than leaking Rust types to clients.
//! 2. **No Panics on Bad Input**: Oversized keys/values are errors, not
//!    assertions.

use thiserror::Error;

/// Result alias used throughout the engine and server crates.
pub type HkvResult<T> = Result<T, HkvError>;

/// Engine-level error conditions. `set` is the only fallible engine
/// operation: `get` reports a miss as `Ok(None)` and `delete` always
/// succeeds, matching the wire protocol's unconditional `DELETED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HkvError {
    /// Key exceeds the configured maximum size.
    #[error("key too long")]
    KeyTooLong,
    /// Value exceeds the configured maximum size.
    #[error("value too long")]
    ValueTooLong,
}
