//! # hkv-server
//!
//! The TCP front end: line-protocol framing, the command dispatch table,
//! and in-process metrics. The engine itself lives in `hkv-engine`.

pub mod metrics;
pub mod protocol;
pub mod server;

pub use metrics::Metrics;
pub use server::handle_connection;
