//! The `Repository` capability set shared by every storage backend.
//!
//! Merge rules are the same for all backends: a gauge write overwrites the
//! stored value, a counter write adds its delta (creating the metric with
//! the delta as its value when absent). Batches apply atomically. A counter
//! sum that would leave the i64 range fails with `Overflow` and changes
//! nothing.

use std::fmt::Write as _;

use async_trait::async_trait;
use tally_core::{MetricKind, MetricRecord, MetricValue};

use crate::error::StoreResult;

/// Storage for the current value of every metric, keyed by `(kind, name)`.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Prepare the backend. Safe to call any number of times.
    async fn bootstrap(&self) -> StoreResult<()>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Overwrite a gauge.
    async fn add_gauge(&self, name: &str, value: f64) -> StoreResult<()>;

    /// Atomically add `delta` to a counter, creating it when absent.
    async fn add_counter(&self, name: &str, delta: i64) -> StoreResult<()>;

    /// Apply every record with the gauge/counter rules as one atomic batch.
    async fn add_many(&self, records: &[MetricRecord]) -> StoreResult<()>;

    /// Current value of a metric.
    ///
    /// Fails with `NotFound` when nothing is stored under the name, and with
    /// `TypeMismatch` when the name is only stored under the other kind.
    async fn get_metric(&self, kind: MetricKind, name: &str) -> StoreResult<MetricValue>;

    /// Full current state, ordered by type name (`counter` before `gauge`),
    /// then by metric name.
    async fn get_all_metrics_slice(&self) -> StoreResult<Vec<MetricRecord>>;

    /// Full current state in listing order, with every stored counter reset
    /// to zero in the same critical section.
    ///
    /// Counter values in the returned batch are the deltas accumulated since
    /// the previous snapshot, so pushing each snapshot once never counts a
    /// contribution twice.
    async fn take_snapshot(&self) -> StoreResult<Vec<MetricRecord>>;

    /// Drop every metric. Test support only.
    async fn reset(&self) -> StoreResult<()>;

    /// Apply a single record with the rule for its kind.
    async fn add(&self, record: &MetricRecord) -> StoreResult<()> {
        match record.value {
            MetricValue::Gauge(v) => self.add_gauge(&record.name, v).await,
            MetricValue::Counter(d) => self.add_counter(&record.name, d).await,
        }
    }

    /// Human-readable listing of the full current state.
    async fn get_all_metrics(&self) -> StoreResult<String> {
        let metrics = self.get_all_metrics_slice().await?;
        Ok(render_metrics(&metrics))
    }
}

/// Render records one per line as `type: <kind>, name: <name>, value: <value>`.
pub fn render_metrics(metrics: &[MetricRecord]) -> String {
    let mut out = String::new();
    for m in metrics {
        let _ = writeln!(out, "type: {}, name: {}, value: {}", m.kind(), m.name, m.value);
    }
    out
}
