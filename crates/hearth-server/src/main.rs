//! # hearth-server
//!
//! HTTP server for the Hearth family board.
//!
//! This binary provides:
//! - **REST API** (axum) for direct messages, group chats and call signaling
//! - **SQLite storage** through `hearth-store`
//! - **Per-IP rate limiting** to keep runaway pollers in check
//! - an optional **stale call purge** that clears sessions nobody hung up

mod api;
mod config;
mod error;
mod rate_limit;

use std::time::Duration;

use hearth_store::Database;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hearth_server=debug,hearth_store=debug")),
        )
        .init();

    info!("Starting Hearth server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and open the database
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let http_addr = config.http_addr;
    let stale_call_secs = config.stale_call_secs;
    let app_state = AppState::new(db, config);

    // -----------------------------------------------------------------------
    // 3. Spawn background tasks
    // -----------------------------------------------------------------------

    // Rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(Duration::from_secs(600)).await;
        }
    });

    if stale_call_secs > 0 {
        let db = app_state.db.clone();
        let max_age = chrono::Duration::seconds(i64::try_from(stale_call_secs).unwrap_or(i64::MAX));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let cutoff = chrono::Utc::now() - max_age;
                let result = match db.lock() {
                    Ok(db) => db.purge_stale_calls(cutoff),
                    Err(_) => {
                        warn!("Database lock poisoned, stopping stale call purge");
                        break;
                    }
                };
                if let Err(e) = result {
                    warn!(error = %e, "Stale call purge failed");
                }
            }
        });
        info!(max_age_secs = stale_call_secs, "Stale call purge enabled");
    }

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
