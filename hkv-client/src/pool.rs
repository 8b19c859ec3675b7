//! # Connection Pool
//!
//! Purpose: Reuse TCP connections for the sync client to reduce handshake
//! latency and allocation churn.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Cache-Friendly Buffers**: Each connection reuses its own buffers.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::{ClientError, ClientResult};
use crate::protocol;

/// Pool configuration for the sync client.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:11212".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a new connection pool with the provided configuration.
    pub fn new(config: PoolConfig) -> ClientResult<Self> {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        })
    }

    /// Acquires a connection from the pool.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(ClientError::PoolExhausted);
        }

        match Connection::connect(&self.inner.config) {
            Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    fn pop_idle(&self) -> Option<Connection> {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.idle.len() < self.inner.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    fn conn_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection exists")
    }

    /// Invalidates the connection so it is dropped instead of pooled; call
    /// after any I/O or protocol error, since the stream position can no
    /// longer be trusted for reuse.
    fn poison(&mut self) {
        self.valid = false;
    }

    pub fn set(&mut self, key: &[u8], expire_seconds: u64, value: &[u8]) -> ClientResult<()> {
        let result = self.conn_mut().set(key, expire_seconds, value);
        if result.is_err() {
            self.poison();
        }
        result
    }

    pub fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        let result = self.conn_mut().get(key);
        if result.is_err() {
            self.poison();
        }
        result
    }

    pub fn delete(&mut self, key: &[u8]) -> ClientResult<()> {
        let result = self.conn_mut().delete(key);
        if result.is_err() {
            self.poison();
        }
        result
    }

    pub fn ping(&mut self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        let result = self.conn_mut().ping(payload);
        if result.is_err() {
            self.poison();
        }
        result
    }

    pub fn info(&mut self) -> ClientResult<Vec<u8>> {
        let result = self.conn_mut().info();
        if result.is_err() {
            self.poison();
        }
        result
    }

    pub fn quit(&mut self) -> ClientResult<()> {
        let result = self.conn_mut().quit();
        self.poison();
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        if self.valid {
            pool.return_connection(conn);
        } else {
            pool.release_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(config: &PoolConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn send(&mut self) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }

    fn set(&mut self, key: &[u8], expire_seconds: u64, value: &[u8]) -> ClientResult<()> {
        self.write_buf.clear();
        protocol::encode_set(key, expire_seconds, value, &mut self.write_buf);
        self.send()?;
        protocol::read_set_response(&mut self.reader, &mut self.line_buf)
    }

    fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.write_buf.clear();
        protocol::encode_get(key, &mut self.write_buf);
        self.send()?;
        protocol::read_get_response(&mut self.reader, &mut self.line_buf)
    }

    fn delete(&mut self, key: &[u8]) -> ClientResult<()> {
        self.write_buf.clear();
        protocol::encode_delete(key, &mut self.write_buf);
        self.send()?;
        protocol::read_delete_response(&mut self.reader, &mut self.line_buf)
    }

    fn ping(&mut self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        self.write_buf.clear();
        protocol::encode_ping(payload, &mut self.write_buf);
        self.send()?;
        protocol::read_ping_response(&mut self.reader, &mut self.line_buf)
    }

    fn info(&mut self) -> ClientResult<Vec<u8>> {
        self.write_buf.clear();
        protocol::encode_info(&mut self.write_buf);
        self.send()?;
        protocol::read_info_response(&mut self.reader, &mut self.line_buf)
    }

    fn quit(&mut self) -> ClientResult<()> {
        self.write_buf.clear();
        protocol::encode_quit(&mut self.write_buf);
        self.send()?;
        protocol::read_quit_response(&mut self.reader, &mut self.line_buf)
    }
}

fn connect_stream(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addr: SocketAddr = config.addr.parse().map_err(|_| ClientError::InvalidAddress)?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    Ok(stream)
}
