//! site-guard server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───────────────▶ http::server (request ID, trace, timeout, body limit)
//!                          │
//!                          ▼
//!                      http::middleware
//!                          ├─ security::nonce       fresh CSP nonce
//!                          ├─ security::token       CSRF double-submit check
//!                          └─ security::rate_limit  sliding window per address
//!                          │
//!                          ▼
//!                      http::handlers ──▶ security::events (violations, rejections)
//!                          │
//!                          ▼
//!     Client Response ◀─ security::headers (CSP + manifest hashes, x-nonce, cookie)
//!
//!     Cross-cutting: config, observability, lifecycle, hashes (manifest + watcher)
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use site_guard::config::{apply_env_overrides, load_config, GuardConfig};
use site_guard::lifecycle::{signals, Shutdown};
use site_guard::observability::{logging, metrics};
use site_guard::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "site-guard", version, about = "Security endpoints and middleware for the marketing site")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "SITE_GUARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    apply_env_overrides(&mut config);

    logging::init_tracing(&config.observability, config.mode);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "site-guard starting");

    tracing::info!(
        mode = ?config.mode,
        bind_address = %config.server.bind_address,
        rate_limit = config.rate_limit.max_requests,
        window_ms = config.rate_limit.window_ms,
        manifest = %config.csp.manifest_path,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(shutdown.clone());

    HttpServer::new(config).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
