//! tally-agent: the metrics agent binary.
//!
//! # Usage
//!
//! ```text
//! tally-agent -a localhost:8080 -p 2 -r 10 -k secret
//! ```
//!
//! Every flag can also come from the environment (`ADDRESS`,
//! `POLL_INTERVAL`, `REPORT_INTERVAL`, `KEY`, `REQUEST_TIMEOUT`) or from a
//! TOML file given with `-c`/`CONFIG`. Flags and environment win over the
//! file; the file wins over built-in defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use tally_agent::{Collector, PushClient, Synchronizer, SystemSampler};
use tally_core::config::load_file;
use tally_core::{AgentSettings, Signer};
use tally_store::{InMemoryStore, Repository};

#[derive(Parser)]
#[command(name = "tally-agent", about = "tally metrics agent", version)]
struct Cli {
    /// Server address (host:port).
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between samples.
    #[arg(short = 'p', long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Seconds between pushes to the server.
    #[arg(short = 'r', long, env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// Shared HMAC key for request signing.
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,

    /// Per-push timeout in seconds.
    #[arg(long = "timeout", env = "REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// TOML configuration file.
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> AgentSettings {
        AgentSettings {
            address: self.address.clone(),
            poll_interval: self.poll_interval.map(Duration::from_secs),
            report_interval: self.report_interval.map(Duration::from_secs),
            key: self.key.clone(),
            request_timeout: self.request_timeout.map(Duration::from_secs),
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
        Some(path) => load_file::<AgentSettings>(path)?,
        None => AgentSettings::default(),
    };
    let config = cli.settings().or(file).resolve();

    if config.poll_interval.is_zero() || config.report_interval.is_zero() {
        bail!("poll and report intervals must be positive");
    }

    info!(
        address = %config.address,
        poll_interval = ?config.poll_interval,
        report_interval = ?config.report_interval,
        signed = config.key.is_some(),
        "tally agent starting"
    );

    let repo: Arc<dyn Repository> = Arc::new(InMemoryStore::new());

    let collector = Collector::new(
        Arc::clone(&repo),
        Box::new(SystemSampler::new()),
        config.poll_interval,
    );
    let client = PushClient::new(
        &config.address,
        Signer::from_key(config.key.as_deref()),
        config.request_timeout,
    );
    let synchronizer = Synchronizer::new(repo, client, config.report_interval);

    let (collect_tx, collect_rx) = watch::channel(false);
    let (push_tx, push_rx) = watch::channel(false);
    let collect_handle = tokio::spawn(collector.run(collect_rx));
    let push_handle = tokio::spawn(synchronizer.run(push_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // Stop sampling first so the final push carries the final sample.
    let _ = collect_tx.send(true);
    let _ = collect_handle.await;
    let _ = push_tx.send(true);
    let _ = push_handle.await;

    info!("tally agent stopped");
    Ok(())
}
