//! Synchronizer: periodically pushes the agent's full metric set to the
//! server.
//!
//! Each push takes a draining snapshot: gauges as stored, counters as the
//! deltas gathered since the previous snapshot. The repository lock is held
//! only while the snapshot is taken; encoding and network I/O happen on the
//! copy. One attempt per tick: a failed push is logged and dropped along
//! with its counter deltas, and the next tick sends a fresh snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use tally_store::Repository;

use crate::client::PushClient;
use crate::error::SyncResult;

/// Periodic pusher of the local repository contents.
pub struct Synchronizer {
    repo: Arc<dyn Repository>,
    client: PushClient,
    interval: Duration,
}

impl Synchronizer {
    pub fn new(repo: Arc<dyn Repository>, client: PushClient, interval: Duration) -> Self {
        Self {
            repo,
            client,
            interval,
        }
    }

    /// Snapshot and push once. Returns the number of records sent; an empty
    /// repository sends nothing.
    pub async fn push_once(&self) -> SyncResult<usize> {
        let batch = self.repo.take_snapshot().await?;
        if batch.is_empty() {
            debug!("nothing to push");
            return Ok(0);
        }

        self.client.push_batch(&batch).await?;
        debug!(count = batch.len(), address = self.client.address(), "batch pushed");
        Ok(batch.len())
    }

    /// Push on every tick until shutdown, then push once more.
    ///
    /// The first push happens one interval after start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            address = self.client.address(),
            "synchronizer started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.push_once().await {
                        error!(error = %e, "metrics push failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("synchronizer shutting down");
                    if let Err(e) = self.push_once().await {
                        error!(error = %e, "final metrics push failed");
                    }
                    break;
                }
            }
        }
    }
}
