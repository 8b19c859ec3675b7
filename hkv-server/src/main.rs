//! # hkv-server binary
//!
//! Starts the TCP listener, the TTL expirer (owned by `Cache`), and spawns
//! one task per accepted connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hkv_common::CacheConfig;
use hkv_engine::Cache;
use hkv_server::metrics::Metrics;
use hkv_server::server::handle_connection;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        error!(%err, "hkv-server failed to start");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = CacheConfig::from_env();
    let cache = Arc::new(Cache::new(&config));
    let metrics = Arc::new(Metrics::new());

    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    info!(addr = %config.addr, capacity = config.capacity, "hkv-server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };

        let cache = Arc::clone(&cache);
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, cache, metrics).await {
                warn!(%peer, %err, "connection ended with a transport error");
            }
        });
    }
}
