//! tallyd: the tally server daemon.
//!
//! Assembles the repository (PostgreSQL when a DSN is given, otherwise in
//! memory), restores the snapshot file, starts the snapshot persister, and
//! serves the HTTP API until Ctrl-C. Shutdown drains in-flight requests and
//! then writes one final snapshot.
//!
//! # Usage
//!
//! ```text
//! tallyd -a 0.0.0.0:8080 -i 300 -f /var/lib/tally/metrics.json -k secret
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tokio::sync::watch;
use tracing::info;

use tally_core::config::load_file;
use tally_core::{ServerSettings, Signer};
use tally_server::{Receiver, SnapshotPersister, build_router};

#[derive(Parser)]
#[command(name = "tallyd", about = "tally metrics server", version)]
struct Cli {
    /// Listen address (host:port).
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between snapshot flushes; 0 flushes after every write.
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file path.
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    store_file: Option<PathBuf>,

    /// Restore the snapshot file at startup.
    #[arg(short = 'r', long, env = "RESTORE", action = ArgAction::Set)]
    restore: Option<bool>,

    /// Shared HMAC key for request verification and response signing.
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,

    /// PostgreSQL connection string.
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// TOML configuration file.
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> ServerSettings {
        ServerSettings {
            address: self.address.clone(),
            store_interval: self.store_interval.map(Duration::from_secs),
            store_file: self.store_file.clone(),
            restore: self.restore,
            key: self.key.clone(),
            database_dsn: self.database_dsn.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tally=debug")),
        )
        .init();

    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => load_file::<ServerSettings>(path)?,
        None => ServerSettings::default(),
    };
    let config = cli.settings().or(file).resolve();

    info!(
        address = %config.address,
        store_interval = ?config.store_interval,
        store_file = %config.store_file.display(),
        restore = config.restore,
        database = config.database_dsn.is_some(),
        signed = config.key.is_some(),
        "tallyd starting"
    );

    // ── Storage ────────────────────────────────────────────────

    let repo = tally_store::open_repository(config.database_dsn.as_deref()).await?;

    let persister = Arc::new(SnapshotPersister::new(
        Arc::clone(&repo),
        config.store_file.clone(),
        config.store_interval,
    ));
    if config.restore {
        // A snapshot that cannot be read must stop startup.
        let restored = persister.restore().await?;
        info!(count = restored, "snapshot restore complete");
    }

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let persist_handle = tokio::spawn(Arc::clone(&persister).run(shutdown_rx));

    // ── HTTP ───────────────────────────────────────────────────

    let receiver = Arc::new(Receiver::new(
        repo,
        Some(persister),
        Signer::from_key(config.key.as_deref()),
    ));
    let router = build_router(receiver);

    let listener = tokio::net::TcpListener::bind(&config.address).await?;
    info!(addr = %listener.local_addr()?, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    // Requests are drained; the persister writes its final snapshot now.
    let _ = shutdown_tx.send(true);
    let _ = persist_handle.await;

    info!("tallyd stopped");
    Ok(())
}
