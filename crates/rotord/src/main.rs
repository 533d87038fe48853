//! rotord — the rotor daemon.
//!
//! Single binary wiring the dispatcher together:
//! - worker registry + round-robin dispatcher
//! - file-backed state feed keeping the registry reconciled
//! - HTTP gateway proxying traffic to dispatched workers
//!
//! # Usage
//!
//! ```text
//! rotord serve --port 8090 --state-file /var/lib/rotor/workers.json
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rotor_feed::{FeedSync, FileFeed};
use rotor_gateway::ProxyGateway;
use rotor_registry::{Dispatcher, WorkerRegistry};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::config::Settings;

mod config;

#[derive(Parser)]
#[command(name = "rotord", about = "Rotor daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve proxied traffic with the worker set synced from a state file.
    Serve {
        /// Port to listen on. Falls back to ROTOR_PORT.
        #[arg(long)]
        port: Option<u16>,

        /// JSON document holding the desired worker set. Falls back to
        /// ROTOR_STATE_FILE.
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// State file poll interval in milliseconds.
        #[arg(long, default_value = "1000")]
        poll_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rotord=debug,rotor=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port, state_file, poll_interval_ms } => {
            let settings = Settings::resolve(port, state_file, poll_interval_ms)
                .context("configuration incomplete")?;
            serve(settings).await
        }
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    info!("rotor daemon starting");

    // ── Assemble components ────────────────────────────────────

    // One registry instance, injected everywhere it is read.
    let registry = WorkerRegistry::new();
    let dispatcher = Dispatcher::new(registry.clone());
    let gateway = ProxyGateway::new(registry.clone(), dispatcher);
    info!("worker registry initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Subscribe the state feed ───────────────────────────────

    let (feed_tx, feed_rx) = mpsc::channel(16);
    let feed = FileFeed::new(&settings.state_file, settings.poll_interval);
    info!(
        path = %settings.state_file.display(),
        interval_ms = settings.poll_interval.as_millis() as u64,
        "state feed subscribed"
    );

    let poller = tokio::spawn(feed.run(feed_tx, shutdown_rx.clone()));
    let sync = tokio::spawn(FeedSync::new(registry).run(feed_rx, shutdown_rx.clone()));

    // ── Serve ──────────────────────────────────────────────────

    // Bind before any traffic; a taken or privileged port is fatal here.
    let listener = TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("failed to bind port {}", settings.port))?;

    // Graceful shutdown on Ctrl-C.
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    gateway.serve(listener, shutdown_rx).await?;

    // Let the feed tasks drain.
    let _ = poller.await;
    let _ = sync.await;

    info!("rotor daemon stopped");
    Ok(())
}
