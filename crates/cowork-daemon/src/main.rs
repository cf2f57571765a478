//! cowork-daemon - host-native backend service for the Cowork desktop
//! client.
//!
//! Listens on a local Unix socket, speaks the client's length-prefixed
//! JSON protocol, and runs the client's agent processes directly on this
//! host instead of inside a VM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cowork_daemon::backend::{Backend, HostBackend, HostBackendConfig};
use cowork_daemon::{SocketServer, default_socket_path};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// cowork host service - drives agent CLIs for the Cowork desktop client
#[derive(Parser, Debug)]
#[command(name = "cowork-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Unix socket path (defaults to the user's runtime directory)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let socket_path = args.socket.unwrap_or_else(default_socket_path);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "cowork-daemon starting (host backend)"
    );
    info!("socket: {:?}", socket_path);

    let backend = Arc::new(HostBackend::new(HostBackendConfig::default()));
    backend.set_debug_logging(args.debug);

    let server = SocketServer::new(&socket_path, Arc::clone(&backend));
    server.start().context("failed to start server")?;

    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    info!("shutting down...");
    backend.kill_all().await;
    server.stop().await;

    Ok(())
}
