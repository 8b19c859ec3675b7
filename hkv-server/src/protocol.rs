//! # Line Protocol
//!
//! Parses the memcache-style text dialect off a growing byte buffer:
//! `set`/`get`/`delete`/`quit`/`ping`/`info`, one command per line, `set`
//! additionally framing a fixed-size value payload.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: `Parser::parse` is called after every socket
//!    read and returns `Ok(None)` when the buffer doesn't yet hold a full
//!    command, draining the buffer across reads rather than requiring a
//!    complete command in one read.
//! 2. **LF or CRLF on Input**: the parser accepts either line ending on
//!    requests, per the wire grammar; responses always use CRLF.
//! 3. **Errors Carry a Reason**: malformed input produces a `ProtocolError`
//!    with a human-readable reason string, not a boolean.

use bytes::{Buf, BytesMut};

use hkv_common::config::MAX_VALUE_LEN;

/// A fully parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Set {
        key: Vec<u8>,
        expire_seconds: u64,
        value: Vec<u8>,
    },
    Get {
        key: Vec<u8>,
    },
    Delete {
        key: Vec<u8>,
    },
    Ping {
        payload: Option<Vec<u8>>,
    },
    Info,
    Quit,
    Unknown,
}

/// Malformed input. `reason` is rendered verbatim into `CLIENT_ERROR
/// <reason>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub reason: &'static str,
    /// True when the parser's position inside the buffer is no longer
    /// trustworthy (a `set` payload read failed partway through), meaning
    /// the connection must close rather than continue to the next line.
    pub fatal: bool,
}

impl ProtocolError {
    fn recoverable(reason: &'static str) -> Self {
        ProtocolError {
            reason,
            fatal: false,
        }
    }

    fn fatal(reason: &'static str) -> Self {
        ProtocolError {
            reason,
            fatal: true,
        }
    }
}

/// Incremental parser over the bytes read so far for one connection.
///
/// Holds no state across `set` payloads; the caller retries parsing once
/// more bytes have arrived in `buffer`.
#[derive(Debug, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Parser
    }

    /// Attempts to parse exactly one request from the front of `buffer`,
    /// consuming the bytes it used. Returns `Ok(None)` if `buffer` doesn't
    /// yet contain a full command (the caller should read more and retry).
    ///
    /// For `set`, nothing is consumed until the header, the full value
    /// payload, and its terminator are all present — a 4 MiB value never
    /// arrives in one socket read, so the header must survive across
    /// however many `parse` calls it takes for the payload to fill in.
    pub fn parse(&mut self, buffer: &mut BytesMut) -> Result<Option<Request>, ProtocolError> {
        let line_end = match find_line_end(buffer) {
            Some(end) => end,
            None => return Ok(None),
        };

        // Copied out so token slices don't borrow `buffer`: `set` needs to
        // inspect bytes past the header before it can decide whether to
        // consume anything.
        let header = buffer[..line_end.content_len].to_vec();
        let tokens: Vec<&[u8]> = header.split(|&b| b == b' ').filter(|t| !t.is_empty()).collect();

        if tokens.is_empty() {
            buffer.advance(line_end.consumed);
            return self.parse(buffer);
        }

        let cmd = tokens[0];
        if eq_ignore_ascii_case(cmd, b"set") {
            return parse_set(&tokens, line_end.consumed, buffer);
        }

        buffer.advance(line_end.consumed);
        if eq_ignore_ascii_case(cmd, b"get") {
            parse_get(&tokens)
        } else if eq_ignore_ascii_case(cmd, b"delete") {
            parse_delete(&tokens)
        } else if eq_ignore_ascii_case(cmd, b"quit") {
            Ok(Some(Request::Quit))
        } else if eq_ignore_ascii_case(cmd, b"ping") {
            parse_ping(&tokens)
        } else if eq_ignore_ascii_case(cmd, b"info") {
            Ok(Some(Request::Info))
        } else {
            Ok(Some(Request::Unknown))
        }
    }
}

/// Parses a `set` header plus its framed value payload.
///
/// `header_len` is the number of bytes the header line occupies, including
/// its terminator. Nothing is dropped from `buffer` until the header,
/// `value_size` payload bytes, and the payload's own terminator are all
/// confirmed present; on `Ok(None)` the buffer is left untouched so the
/// caller can retry once more bytes have arrived.
fn parse_set(
    tokens: &[&[u8]],
    header_len: usize,
    buffer: &mut BytesMut,
) -> Result<Option<Request>, ProtocolError> {
    if tokens.len() != 4 {
        buffer.advance(header_len);
        return Err(ProtocolError::recoverable("invalid set command"));
    }

    let key = tokens[1].to_vec();
    if key.is_empty() {
        buffer.advance(header_len);
        return Err(ProtocolError::recoverable("invalid key"));
    }

    let expire_seconds = match parse_u64(tokens[2]) {
        Some(value) => value,
        None => {
            buffer.advance(header_len);
            return Err(ProtocolError::recoverable("invalid expire time"));
        }
    };

    let value_size = match parse_u64(tokens[3]).and_then(|v| usize::try_from(v).ok()) {
        Some(value) => value,
        None => {
            buffer.advance(header_len);
            return Err(ProtocolError::recoverable("invalid value size"));
        }
    };

    // Reject before waiting on a single byte of payload: otherwise a
    // crafted size either overflows the length check below or leaves the
    // connection buffering forever for a value that will never fit.
    if value_size > MAX_VALUE_LEN {
        buffer.advance(header_len);
        return Err(ProtocolError::recoverable("invalid value size"));
    }

    // Payload plus its trailing line terminator (1 or 2 bytes); wait for
    // enough bytes before committing to reading it, without touching the
    // header in the meantime.
    if buffer.len() < header_len + value_size + 1 {
        return Ok(None);
    }

    let terminator_len = match buffer[header_len + value_size] {
        b'\n' => 1,
        b'\r' => {
            if buffer.len() < header_len + value_size + 2 {
                return Ok(None);
            }
            if buffer[header_len + value_size + 1] != b'\n' {
                buffer.advance(header_len + value_size + 2);
                return Err(ProtocolError::fatal("malformed value terminator"));
            }
            2
        }
        _ => {
            buffer.advance(header_len + value_size + 1);
            return Err(ProtocolError::fatal("malformed value terminator"));
        }
    };

    let value = buffer[header_len..header_len + value_size].to_vec();
    buffer.advance(header_len + value_size + terminator_len);

    Ok(Some(Request::Set {
        key,
        expire_seconds,
        value,
    }))
}

fn parse_get(tokens: &[&[u8]]) -> Result<Option<Request>, ProtocolError> {
    if tokens.len() != 2 {
        return Err(ProtocolError::recoverable("invalid get command"));
    }
    Ok(Some(Request::Get {
        key: tokens[1].to_vec(),
    }))
}

fn parse_delete(tokens: &[&[u8]]) -> Result<Option<Request>, ProtocolError> {
    if tokens.len() != 2 {
        return Err(ProtocolError::recoverable("invalid delete command"));
    }
    Ok(Some(Request::Delete {
        key: tokens[1].to_vec(),
    }))
}

fn parse_ping(tokens: &[&[u8]]) -> Result<Option<Request>, ProtocolError> {
    match tokens.len() {
        1 => Ok(Some(Request::Ping { payload: None })),
        2 => Ok(Some(Request::Ping {
            payload: Some(tokens[1].to_vec()),
        })),
        _ => Err(ProtocolError::recoverable("invalid ping command")),
    }
}

struct LineEnd {
    /// Bytes to drop from the buffer, including the line terminator.
    consumed: usize,
    /// Length of the line's content, excluding the terminator.
    content_len: usize,
}

/// Finds the next LF, tolerating an optional preceding CR.
fn find_line_end(buffer: &BytesMut) -> Option<LineEnd> {
    let lf = buffer.iter().position(|&b| b == b'\n')?;
    let content_len = if lf > 0 && buffer[lf - 1] == b'\r' {
        lf - 1
    } else {
        lf
    };
    Some(LineEnd {
        consumed: lf + 1,
        content_len,
    })
}

fn eq_ignore_ascii_case(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

fn parse_u64(token: &[u8]) -> Option<u64> {
    if token.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in token {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(bytes: &[u8]) -> BytesMut {
        BytesMut::from(bytes)
    }

    #[test]
    fn parses_set_with_crlf() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"set foo 0 3\r\nbar\r\n");
        let req = parser.parse(&mut buffer).unwrap().unwrap();
        assert_eq!(
            req,
            Request::Set {
                key: b"foo".to_vec(),
                expire_seconds: 0,
                value: b"bar".to_vec(),
            }
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn parses_set_with_lf_only() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"set foo 0 3\nbar\n");
        let req = parser.parse(&mut buffer).unwrap().unwrap();
        assert_eq!(
            req,
            Request::Set {
                key: b"foo".to_vec(),
                expire_seconds: 0,
                value: b"bar".to_vec(),
            }
        );
    }

    #[test]
    fn incomplete_set_payload_returns_none() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"set foo 0 3\r\nba");
        assert_eq!(parser.parse(&mut buffer), Ok(None));
    }

    #[test]
    fn incomplete_set_payload_keeps_the_header_for_the_next_read() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"set foo 0 3\r\nba");
        assert_eq!(parser.parse(&mut buffer), Ok(None));

        // More bytes arrive on a later socket read; the header must still
        // be there to parse against, not have been dropped already.
        buffer.extend_from_slice(b"r\r\n");
        let req = parser.parse(&mut buffer).unwrap().unwrap();
        assert_eq!(
            req,
            Request::Set {
                key: b"foo".to_vec(),
                expire_seconds: 0,
                value: b"bar".to_vec(),
            }
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn set_header_and_payload_split_across_many_reads() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"set foo 0 3");
        assert_eq!(parser.parse(&mut buffer), Ok(None));

        buffer.extend_from_slice(b"\r\n");
        assert_eq!(parser.parse(&mut buffer), Ok(None));

        buffer.extend_from_slice(b"ba");
        assert_eq!(parser.parse(&mut buffer), Ok(None));

        buffer.extend_from_slice(b"r\r\n");
        let req = parser.parse(&mut buffer).unwrap().unwrap();
        assert_eq!(
            req,
            Request::Set {
                key: b"foo".to_vec(),
                expire_seconds: 0,
                value: b"bar".to_vec(),
            }
        );
    }

    #[test]
    fn oversized_value_size_is_rejected_without_buffering() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"set foo 0 99999999999\r\n");
        let err = parser.parse(&mut buffer).unwrap_err();
        assert_eq!(err.reason, "invalid value size");
        assert!(!err.fatal);
        // The header was dropped so the connection can continue.
        assert!(buffer.is_empty());
    }

    #[test]
    fn value_size_just_over_the_limit_is_rejected() {
        let mut parser = Parser::new();
        let mut buffer = buf(format!("set foo 0 {}\r\n", MAX_VALUE_LEN + 1).as_bytes());
        let err = parser.parse(&mut buffer).unwrap_err();
        assert_eq!(err.reason, "invalid value size");
        assert!(!err.fatal);
    }

    #[test]
    fn invalid_expire_time_is_recoverable_client_error() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"set k notanint 1\r\n");
        let err = parser.parse(&mut buffer).unwrap_err();
        assert_eq!(err.reason, "invalid expire time");
        assert!(!err.fatal);
    }

    #[test]
    fn parses_get_delete_quit() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"get foo\r\ndelete foo\r\nquit\r\n");
        assert_eq!(
            parser.parse(&mut buffer).unwrap().unwrap(),
            Request::Get { key: b"foo".to_vec() }
        );
        assert_eq!(
            parser.parse(&mut buffer).unwrap().unwrap(),
            Request::Delete { key: b"foo".to_vec() }
        );
        assert_eq!(parser.parse(&mut buffer).unwrap().unwrap(), Request::Quit);
    }

    #[test]
    fn unknown_command_is_not_an_error() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"frobnicate\r\n");
        assert_eq!(parser.parse(&mut buffer).unwrap().unwrap(), Request::Unknown);
    }

    #[test]
    fn ping_with_and_without_payload() {
        let mut parser = Parser::new();
        let mut buffer = buf(b"ping\r\nping hello\r\n");
        assert_eq!(
            parser.parse(&mut buffer).unwrap().unwrap(),
            Request::Ping { payload: None }
        );
        assert_eq!(
            parser.parse(&mut buffer).unwrap().unwrap(),
            Request::Ping {
                payload: Some(b"hello".to_vec())
            }
        );
    }
}
