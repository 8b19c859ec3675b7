//! End-to-end tests driving a real server instance over TCP, covering the
//! set/get, eviction, and TTL scenarios from the wire protocol.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hkv_common::CacheConfig;
use hkv_engine::Cache;
use hkv_server::Metrics;
use tokio::net::TcpListener;
use tokio::runtime::Builder;

use hkv_client::{ClientConfig, KVClient};

/// Spawns a server on an OS-assigned port and returns its address. The
/// server runs on a dedicated thread with its own single-threaded runtime
/// for the lifetime of the test process.
fn spawn_server(capacity: usize, tick: Duration) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.set_nonblocking(true).expect("nonblocking");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let listener = TcpListener::from_std(listener).expect("tokio listener");
            let cache = Arc::new(Cache::new(&CacheConfig {
                addr: String::new(),
                capacity,
                tick,
            }));
            let metrics = Arc::new(Metrics::new());
            loop {
                let (stream, _) = listener.accept().await.expect("accept");
                let cache = Arc::clone(&cache);
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    let _ = hkv_server::handle_connection(stream, cache, metrics).await;
                });
            }
        });
    });

    // Give the background thread a moment to bind and start accepting.
    thread::sleep(Duration::from_millis(50));
    addr
}

fn client_for(addr: &str) -> KVClient {
    KVClient::with_config(ClientConfig {
        addr: addr.to_string(),
        max_idle: 4,
        max_total: 4,
        read_timeout: Some(Duration::from_secs(2)),
        write_timeout: Some(Duration::from_secs(2)),
        connect_timeout: Some(Duration::from_secs(2)),
    })
    .expect("client")
}

#[test]
fn s1_set_get_roundtrip() {
    let addr = spawn_server(1000, Duration::from_secs(3600));
    let client = client_for(&addr);

    client.set(b"foo", b"bar").expect("set");
    let value = client.get(b"foo").expect("get");
    assert_eq!(value, Some(b"bar".to_vec()));
}

#[test]
fn s2_delete_missing_is_unconditionally_deleted() {
    let addr = spawn_server(1000, Duration::from_secs(3600));
    let client = client_for(&addr);

    client.delete(b"ghost").expect("delete of missing key must not error");
}

#[test]
fn s3_capacity_eviction_respects_recency() {
    let addr = spawn_server(2, Duration::from_secs(3600));
    let client = client_for(&addr);

    client.set(b"a", b"A").expect("set a");
    client.set(b"b", b"B").expect("set b");
    assert_eq!(client.get(b"a").expect("get a"), Some(b"A".to_vec()));

    // a is now most-recently-touched; inserting c must evict b, not a.
    client.set(b"c", b"C").expect("set c");

    assert_eq!(client.get(b"b").expect("get b"), None);
    assert_eq!(client.get(b"a").expect("get a"), Some(b"A".to_vec()));
    assert_eq!(client.get(b"c").expect("get c"), Some(b"C".to_vec()));
}

#[test]
fn s4_ttl_expiry_is_observed_within_a_tick() {
    let addr = spawn_server(1000, Duration::from_millis(100));
    let client = client_for(&addr);

    client
        .set_with_ttl(b"k", b"V", Duration::from_secs(1))
        .expect("set with ttl");
    assert_eq!(client.get(b"k").expect("get before expiry"), Some(b"V".to_vec()));

    thread::sleep(Duration::from_millis(1400));
    assert_eq!(client.get(b"k").expect("get after expiry"), None);
}

#[test]
fn s5_ttl_reschedule_to_no_expiry_cancels_the_old_ttl() {
    let addr = spawn_server(1000, Duration::from_millis(100));
    let client = client_for(&addr);

    client
        .set_with_ttl(b"k", b"V", Duration::from_secs(100))
        .expect("set with long ttl");
    client.set(b"k", b"V").expect("reschedule to no expiry");

    // A long sleep past the original TTL would still find the key; we
    // settle for observing it survives a few expirer ticks.
    thread::sleep(Duration::from_millis(400));
    assert_eq!(client.get(b"k").expect("get after reschedule"), Some(b"V".to_vec()));
}

#[test]
fn s6_malformed_command_does_not_kill_the_connection() {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;

    let addr = spawn_server(1000, Duration::from_secs(3600));
    let mut stream = TcpStream::connect(&addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("timeout");

    stream.write_all(b"set k notanint 1\r\n").expect("write malformed");
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut line = String::new();
    reader.read_line(&mut line).expect("read client error");
    assert_eq!(line, "CLIENT_ERROR invalid expire time\r\n");

    stream.write_all(b"set k 0 1\r\nV\r\n").expect("write valid set");
    line.clear();
    reader.read_line(&mut line).expect("read stored");
    assert_eq!(line, "STORED\r\n");
}
