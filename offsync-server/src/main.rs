//! offsync reconciliation server
//!
//! Holds the authoritative records for offsync clients and reconciles their
//! queued operations.
//!
//! Usage:
//!   offsync-server --port 4100 --database offsync-server.db

use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use anyhow::{Context, Result};
use clap::Parser;
use offsync_server::{build_router, ReconciliationEndpoint, ServerStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "offsync-server")]
#[command(about = "offsync remote reconciliation endpoint")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "OFFSYNC_PORT", default_value = "4100")]
    port: u16,

    /// Address to bind
    #[arg(long, env = "OFFSYNC_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Path to the SQLite database
    #[arg(short, long, env = "OFFSYNC_DATABASE", default_value = "offsync-server.db")]
    database: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("offsync server starting...");
    let store = ServerStore::open(&args.database)
        .with_context(|| format!("Failed to open database {}", args.database.display()))?;
    let app = build_router(Arc::new(ReconciliationEndpoint::new(store)));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}
