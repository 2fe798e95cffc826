//! Affinity proxy
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                    AFFINITY PROXY                     │
//!   Client ───────▶│ http::server ─▶ routing::router ─▶ security::trust    │
//!                  │                                      │                │
//!                  │        locator ◀── artifact ref ─────┤                │
//!                  │        affinity ◀─ correlation key ──┤                │
//!                  │        load_balancer ◀─ fresh ───────┤                │
//!                  │                                      ▼                │
//!                  │                               quota::ledger           │
//!                  │                                      │                │
//!   Client ◀───────│ rewrite::stream ◀─ SSE ◀─ reqwest ◀──┘ ◀─────────────│◀── Backend
//!                  │                                                       │
//!                  │  config (toml + env, hot reload) · observability ·    │
//!                  │  lifecycle (signals, drain) · admin API               │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use affinity_proxy::config::loader::{load_config, load_from_env};
use affinity_proxy::config::watcher::ConfigWatcher;
use affinity_proxy::lifecycle::{wait_for_signal, Shutdown};
use affinity_proxy::net::load_tls_config;
use affinity_proxy::observability::{logging, metrics};
use affinity_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "affinity-proxy", version, about = "Session-affine reverse proxy with daily quotas")]
struct Args {
    /// TOML configuration file. Without it, defaults plus environment are used.
    #[arg(short, long, env = "PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "affinity-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        strategy = ?config.balancing.strategy,
        daily_limit = config.quota.daily_limit,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Hot reload only applies when a file is watched.
    let (_watcher, updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let tls = config.listener.tls.clone();
    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config)?;

    let serve = async move {
        match tls {
            Some(tls) => {
                let rustls = load_tls_config(&tls).await?;
                let addr: SocketAddr = bind_address.parse()?;
                server.run_tls(addr, rustls, updates, server_shutdown).await?;
            }
            None => {
                let listener = TcpListener::bind(&bind_address).await?;
                server.run(listener, updates, server_shutdown).await?;
            }
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    };
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        _ = wait_for_signal() => {
            tracing::info!("Shutting down, draining open streams");
            shutdown.trigger();
            serve.await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
