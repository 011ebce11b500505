//! SnapshotPersister: dumps the full repository to a JSON file and loads
//! it back at startup.
//!
//! A flush writes a sibling temp file, syncs it, and renames it over the
//! target, so a reader sees either the previous snapshot or the new one.
//! Flushes are serialized by an internal mutex. Restore goes through
//! `add_many`, exactly like a network batch, and only into an empty
//! repository: a backend that kept its state (PostgreSQL) already holds
//! what the file would add.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use tally_core::codec;
use tally_store::Repository;

use crate::error::{PersistError, PersistResult};

/// Owner of the snapshot file.
pub struct SnapshotPersister {
    repo: Arc<dyn Repository>,
    path: PathBuf,
    interval: Duration,
    write_lock: Mutex<()>,
}

impl SnapshotPersister {
    /// A zero `interval` selects synchronous mode: the receiver flushes
    /// after every applied write and the timer never fires.
    pub fn new(repo: Arc<dyn Repository>, path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            repo,
            path: path.into(),
            interval,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_sync(&self) -> bool {
        self.interval.is_zero()
    }

    /// Write the current repository contents. Returns the record count.
    pub async fn flush(&self) -> PersistResult<usize> {
        let _guard = self.write_lock.lock().await;

        let records = self.repo.get_all_metrics_slice().await?;
        let bytes = codec::encode_batch(&records)?;

        let tmp = temp_path(&self.path);
        if let Err(e) = write_synced(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(e));
        }
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), count = records.len(), "snapshot flushed");
        Ok(records.len())
    }

    /// Load the snapshot file into the repository. A missing or empty file
    /// holds no state; a repository that already holds metrics is left as
    /// is. Returns the number of records applied.
    pub async fn restore(&self) -> PersistResult<usize> {
        if !self.repo.get_all_metrics_slice().await?.is_empty() {
            info!(path = %self.path.display(), "repository already populated, snapshot not restored");
            return Ok(0);
        }

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot to restore");
                return Ok(0);
            }
            Err(e) => return Err(self.io_error(e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            info!(path = %self.path.display(), "snapshot file is empty");
            return Ok(0);
        }

        let records = codec::decode_batch(&bytes)?;
        self.repo.add_many(&records).await?;
        info!(path = %self.path.display(), count = records.len(), "snapshot restored");
        Ok(records.len())
    }

    /// Flush on every tick until shutdown, then flush once more. In
    /// synchronous mode only the final flush runs here.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.is_sync() {
            info!(path = %self.path.display(), "snapshot persister in synchronous mode");
            let _ = shutdown.changed().await;
        } else {
            info!(
                path = %self.path.display(),
                interval_ms = self.interval.as_millis() as u64,
                "snapshot persister started"
            );
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.flush().await {
                            warn!(error = %e, "snapshot flush failed, retrying next interval");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }

        info!("snapshot persister shutting down");
        if let Err(e) = self.flush().await {
            warn!(error = %e, "final snapshot flush failed");
        }
    }

    fn io_error(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("snapshot"));
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}
