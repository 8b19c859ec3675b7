//! # Line Protocol Codec
//!
//! Purpose: Encode client commands and parse server responses for the
//! memcache-style text dialect, without external dependencies.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides a line buffer to avoid per-call allocations.
//! 3. **Binary-Safe**: Value payloads are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::BufRead;

use crate::client::{ClientError, ClientResult};

/// Writes a `set` command line plus its framed value payload.
pub fn encode_set(key: &[u8], expire_seconds: u64, value: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b"set ");
    out.extend_from_slice(key);
    out.push(b' ');
    push_u64(out, expire_seconds);
    out.push(b' ');
    push_u64(out, value.len() as u64);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

pub fn encode_get(key: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b"get ");
    out.extend_from_slice(key);
    out.extend_from_slice(b"\r\n");
}

pub fn encode_delete(key: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b"delete ");
    out.extend_from_slice(key);
    out.extend_from_slice(b"\r\n");
}

pub fn encode_ping(payload: Option<&[u8]>, out: &mut Vec<u8>) {
    out.extend_from_slice(b"ping");
    if let Some(payload) = payload {
        out.push(b' ');
        out.extend_from_slice(payload);
    }
    out.extend_from_slice(b"\r\n");
}

pub fn encode_info(out: &mut Vec<u8>) {
    out.extend_from_slice(b"info\r\n");
}

pub fn encode_quit(out: &mut Vec<u8>) {
    out.extend_from_slice(b"quit\r\n");
}

/// Reads the response to a `set`: `STORED` or `CLIENT_ERROR <reason>`.
pub fn read_set_response<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> ClientResult<()> {
    read_line(reader, line)?;
    if line.as_slice() == b"STORED" {
        Ok(())
    } else if let Some(reason) = strip_prefix(line, b"CLIENT_ERROR ") {
        Err(ClientError::Server {
            message: reason.to_vec(),
        })
    } else {
        Err(ClientError::Protocol)
    }
}

/// Reads the response to a `get`: `VALUE <key> <len>\r\n<bytes>\r\nEND` or `END`.
pub fn read_get_response<R: BufRead>(
    reader: &mut R,
    line: &mut Vec<u8>,
) -> ClientResult<Option<Vec<u8>>> {
    read_line(reader, line)?;
    if line.as_slice() == b"END" {
        return Ok(None);
    }

    let rest = strip_prefix(line, b"VALUE ").ok_or(ClientError::Protocol)?;
    let mut parts = rest.rsplitn(2, |&b| b == b' ');
    let len_token = parts.next().ok_or(ClientError::Protocol)?;
    let len = parse_usize(len_token)?;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != *b"\r\n" {
        return Err(ClientError::Protocol);
    }

    read_line(reader, line)?;
    if line.as_slice() != b"END" {
        return Err(ClientError::Protocol);
    }

    Ok(Some(data))
}

/// Reads the response to a `delete`: always `DELETED`.
pub fn read_delete_response<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> ClientResult<()> {
    read_line(reader, line)?;
    if line.as_slice() == b"DELETED" {
        Ok(())
    } else {
        Err(ClientError::Protocol)
    }
}

/// Reads the response to a `ping`: `PONG` with no payload, or the echoed
/// payload verbatim.
pub fn read_ping_response<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> ClientResult<Vec<u8>> {
    read_line(reader, line)?;
    if line.as_slice() == b"PONG" {
        Ok(Vec::new())
    } else {
        Ok(line.clone())
    }
}

/// Reads the response to `info`: a single raw line.
pub fn read_info_response<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> ClientResult<Vec<u8>> {
    read_line(reader, line)?;
    Ok(line.clone())
}

/// Reads the response to `quit`: always `BYE`.
pub fn read_quit_response<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> ClientResult<()> {
    read_line(reader, line)?;
    if line.as_slice() == b"BYE" {
        Ok(())
    } else {
        Err(ClientError::Protocol)
    }
}

/// Reads one line, tolerating LF or CRLF, stripping the terminator.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        )));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(())
}

fn strip_prefix<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn parse_usize(token: &[u8]) -> ClientResult<usize> {
    if token.is_empty() {
        return Err(ClientError::Protocol);
    }
    let mut value: usize = 0;
    for &b in token {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as usize))
            .ok_or(ClientError::Protocol)?;
    }
    Ok(value)
}

fn push_u64(out: &mut Vec<u8>, mut value: u64) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encodes_set_command() {
        let mut buf = Vec::new();
        encode_set(b"foo", 5, b"bar", &mut buf);
        assert_eq!(buf, b"set foo 5 3\r\nbar\r\n");
    }

    #[test]
    fn reads_stored() {
        let mut reader = Cursor::new(b"STORED\r\n".to_vec());
        let mut line = Vec::new();
        read_set_response(&mut reader, &mut line).unwrap();
    }

    #[test]
    fn reads_client_error() {
        let mut reader = Cursor::new(b"CLIENT_ERROR invalid expire time\r\n".to_vec());
        let mut line = Vec::new();
        let err = read_set_response(&mut reader, &mut line).unwrap_err();
        match err {
            ClientError::Server { message } => assert_eq!(message, b"invalid expire time"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reads_value_and_end() {
        let mut reader = Cursor::new(b"VALUE foo 3\r\nbar\r\nEND\r\n".to_vec());
        let mut line = Vec::new();
        let value = read_get_response(&mut reader, &mut line).unwrap();
        assert_eq!(value, Some(b"bar".to_vec()));
    }

    #[test]
    fn reads_miss_as_none() {
        let mut reader = Cursor::new(b"END\r\n".to_vec());
        let mut line = Vec::new();
        let value = read_get_response(&mut reader, &mut line).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn reads_ping_echo() {
        let mut reader = Cursor::new(b"hello\r\n".to_vec());
        let mut line = Vec::new();
        let reply = read_ping_response(&mut reader, &mut line).unwrap();
        assert_eq!(reply, b"hello");
    }
}
