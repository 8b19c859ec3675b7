//! # TCP Server
//!
//! Accept line-protocol connections, parse commands, and dispatch them to
//! the `Cache` with minimal overhead.
//!
//! ## Design Principles
//! 1. **One Task Per Connection**: `handle_connection` owns its socket
//!    exclusively; there is no per-connection state shared with the core
//!    beyond the `Arc<Cache>` handle.
//! 2. **Command Errors Don't Kill The Connection**: a malformed command
//!    yields `CLIENT_ERROR` and the loop continues, except when a `set`
//!    payload read failed and the stream position can no longer be
//!    trusted.

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use hkv_engine::Cache;

use crate::metrics::Metrics;
use crate::protocol::{Parser, Request};

/// Handles a single TCP client connection until `quit`, EOF, or a fatal
/// I/O or protocol error.
pub async fn handle_connection(
    mut stream: TcpStream,
    cache: Arc<Cache>,
    metrics: Arc<Metrics>,
) -> std::io::Result<()> {
    let peer = stream.peer_addr().ok();
    trace!(?peer, "connection opened");

    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = Parser::new();

    'connection: loop {
        let read = stream.read_buf(&mut buffer).await?;
        if read == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(request)) => {
                    metrics.record_request_start();
                    let start = Instant::now();
                    let is_quit = matches!(request, Request::Quit);

                    let response = dispatch(request, &cache);
                    stream.write_all(&response).await?;

                    metrics.record_request_end(start.elapsed());
                    if is_quit {
                        break 'connection;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    metrics.record_error();
                    debug!(reason = err.reason, "client protocol error");
                    stream.write_all(&client_error(err.reason)).await?;
                    if err.fatal {
                        break 'connection;
                    }
                }
            }
        }
    }

    trace!(?peer, "connection closed");
    Ok(())
}

fn dispatch(request: Request, cache: &Cache) -> Vec<u8> {
    match request {
        Request::Set {
            key,
            expire_seconds,
            value,
        } => match cache.set(key, &value, expire_seconds) {
            Ok(()) => b"STORED\r\n".to_vec(),
            Err(err) => client_error_owned(err.to_string()),
        },
        Request::Get { key } => match cache.get(&key) {
            Some(value) => {
                let mut out = Vec::with_capacity(value.len() + key.len() + 16);
                out.extend_from_slice(b"VALUE ");
                out.extend_from_slice(&key);
                out.extend_from_slice(b" ");
                out.extend_from_slice(value.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(&value);
                out.extend_from_slice(b"\r\nEND\r\n");
                out
            }
            None => b"END\r\n".to_vec(),
        },
        Request::Delete { key } => {
            cache.delete(&key);
            b"DELETED\r\n".to_vec()
        }
        Request::Ping { payload } => match payload {
            Some(payload) => {
                let mut out = payload;
                out.extend_from_slice(b"\r\n");
                out
            }
            None => b"PONG\r\n".to_vec(),
        },
        Request::Info => b"engine:hkv\r\n".to_vec(),
        Request::Quit => b"BYE\r\n".to_vec(),
        Request::Unknown => b"ERROR\r\n".to_vec(),
    }
}

fn client_error(reason: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(reason.len() + 16);
    out.extend_from_slice(b"CLIENT_ERROR ");
    out.extend_from_slice(reason.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

fn client_error_owned(reason: String) -> Vec<u8> {
    client_error(&reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hkv_common::CacheConfig;
    use std::time::Duration;

    fn cache() -> Cache {
        Cache::new(&CacheConfig {
            addr: "127.0.0.1:0".to_string(),
            capacity: 10,
            tick: Duration::from_millis(50),
        })
    }

    #[test]
    fn set_then_get_matches_wire_grammar() {
        let cache = cache();
        let stored = dispatch(
            Request::Set {
                key: b"foo".to_vec(),
                expire_seconds: 0,
                value: b"bar".to_vec(),
            },
            &cache,
        );
        assert_eq!(stored, b"STORED\r\n");

        let got = dispatch(Request::Get { key: b"foo".to_vec() }, &cache);
        assert_eq!(got, b"VALUE foo 3\r\nbar\r\nEND\r\n");
    }

    #[test]
    fn get_miss_returns_end() {
        let cache = cache();
        let got = dispatch(Request::Get { key: b"ghost".to_vec() }, &cache);
        assert_eq!(got, b"END\r\n");
    }

    #[test]
    fn delete_is_always_deleted() {
        let cache = cache();
        let got = dispatch(Request::Delete { key: b"ghost".to_vec() }, &cache);
        assert_eq!(got, b"DELETED\r\n");
    }

    #[test]
    fn quit_replies_bye() {
        let cache = cache();
        assert_eq!(dispatch(Request::Quit, &cache), b"BYE\r\n");
    }

    #[test]
    fn unknown_replies_error() {
        let cache = cache();
        assert_eq!(dispatch(Request::Unknown, &cache), b"ERROR\r\n");
    }

    #[test]
    fn ping_with_and_without_payload() {
        let cache = cache();
        assert_eq!(dispatch(Request::Ping { payload: None }, &cache), b"PONG\r\n");
        assert_eq!(
            dispatch(
                Request::Ping {
                    payload: Some(b"hi".to_vec())
                },
                &cache
            ),
            b"hi\r\n"
        );
    }
}
