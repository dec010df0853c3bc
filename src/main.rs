//! `pileupd` — the pileup coordination daemon.
//!
//! Configuration comes from the environment:
//! - `PILEUP_BIND` (default `127.0.0.1:8040`)
//! - `PILEUP_DB` (default `pileup.db`)
//! - `PILEUP_ADMIN_TOKEN` (unset rejects all admin requests)
//! - `PILEUP_QUEUE_MAX` (default 20)
//! - `PILEUP_WORKED_TTL_MINUTES` (default 60)
//! - `PILEUP_DEV_CORS` (`1` enables permissive CORS)

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pileup::{
    core::store::StoreConfig,
    persist::sqlite::SqliteOpSink,
    runtime::handle::{RuntimeConfig, spawn_pileup},
    server::{ServerConfig, serve},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind_addr = env_or("PILEUP_BIND", "127.0.0.1:8040".to_string());
    let db_path = env_or("PILEUP_DB", "pileup.db".to_string());
    let admin_token = std::env::var("PILEUP_ADMIN_TOKEN")
        .ok()
        .filter(|t| !t.is_empty());
    let queue_max: usize = env_or("PILEUP_QUEUE_MAX", 20);
    let ttl_minutes: u64 = env_or("PILEUP_WORKED_TTL_MINUTES", 60);
    let permissive_cors = std::env::var("PILEUP_DEV_CORS").is_ok_and(|v| v == "1");

    if admin_token.is_none() {
        warn!("PILEUP_ADMIN_TOKEN not set, admin surface is disabled");
    }

    let store_config = StoreConfig {
        queue_max,
        worked_ttl_ms: ttl_minutes.saturating_mul(60_000),
    };

    let sink = SqliteOpSink::open(&db_path)
        .with_context(|| format!("failed to open journal at {db_path}"))?;
    let store = sink
        .load_store(store_config)
        .context("failed to replay journal")?;
    info!(
        db = %db_path,
        queued = store.queue_len(),
        "state loaded"
    );

    let handle = spawn_pileup(
        store,
        Some(Box::new(sink)),
        None,
        RuntimeConfig::default(),
    );

    let server_config = ServerConfig {
        bind_addr,
        admin_token,
        keepalive_interval: Duration::from_secs(30),
        permissive_cors,
    };
    serve(server_config, handle.clone()).await?;

    handle.shutdown().await.context("shutdown failed")?;
    Ok(())
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, %raw, "unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
