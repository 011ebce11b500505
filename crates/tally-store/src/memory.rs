//! InMemoryStore: a lock-guarded map, used by the agent and by servers
//! running without a database.
//!
//! Every logical operation (single write, whole batch, full read) runs
//! under one acquisition of the same `RwLock`, so concurrent counter adds
//! never lose an update and a reader never observes half of a batch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use tally_core::{MetricKey, MetricKind, MetricRecord, MetricValue};

use crate::error::{StoreError, StoreResult};
use crate::repository::Repository;

/// Thread-safe in-memory repository. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    metrics: Arc<RwLock<HashMap<MetricKey, MetricValue>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored metrics.
    pub async fn len(&self) -> usize {
        self.metrics.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.metrics.read().await.is_empty()
    }
}

/// Merge `incoming` onto what is stored under the same key.
fn merge(stored: Option<MetricValue>, name: &str, incoming: MetricValue) -> StoreResult<MetricValue> {
    match (stored, incoming) {
        (Some(MetricValue::Counter(current)), MetricValue::Counter(delta)) => current
            .checked_add(delta)
            .map(MetricValue::Counter)
            .ok_or_else(|| StoreError::Overflow {
                name: name.to_string(),
            }),
        _ => Ok(incoming),
    }
}

fn apply(map: &mut HashMap<MetricKey, MetricValue>, name: &str, value: MetricValue) -> StoreResult<()> {
    let key = MetricKey::new(value.kind(), name);
    let merged = merge(map.get(&key).copied(), name, value)?;
    map.insert(key, merged);
    Ok(())
}

fn records(map: &HashMap<MetricKey, MetricValue>) -> Vec<MetricRecord> {
    map.iter()
        .map(|(key, value)| MetricRecord {
            name: key.name.clone(),
            value: *value,
        })
        .collect()
}

fn sorted(mut out: Vec<MetricRecord>) -> Vec<MetricRecord> {
    out.sort_by(|a, b| (a.kind().as_str(), &a.name).cmp(&(b.kind().as_str(), &b.name)));
    out
}

#[async_trait]
impl Repository for InMemoryStore {
    async fn bootstrap(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn add_gauge(&self, name: &str, value: f64) -> StoreResult<()> {
        let mut metrics = self.metrics.write().await;
        apply(&mut metrics, name, MetricValue::Gauge(value))
    }

    async fn add_counter(&self, name: &str, delta: i64) -> StoreResult<()> {
        let mut metrics = self.metrics.write().await;
        apply(&mut metrics, name, MetricValue::Counter(delta))
    }

    async fn add_many(&self, records: &[MetricRecord]) -> StoreResult<()> {
        let mut metrics = self.metrics.write().await;
        // Merge into a staging map first; a failure leaves `metrics` untouched.
        let mut staged: HashMap<MetricKey, MetricValue> = HashMap::new();
        for record in records {
            let key = MetricKey::new(record.kind(), record.name.as_str());
            let stored = staged.get(&key).or_else(|| metrics.get(&key)).copied();
            let merged = merge(stored, &record.name, record.value)?;
            staged.insert(key, merged);
        }
        metrics.extend(staged);
        debug!(count = records.len(), "batch applied");
        Ok(())
    }

    async fn get_metric(&self, kind: MetricKind, name: &str) -> StoreResult<MetricValue> {
        let metrics = self.metrics.read().await;
        if let Some(value) = metrics.get(&MetricKey::new(kind, name)) {
            return Ok(*value);
        }
        if metrics.contains_key(&MetricKey::new(kind.other(), name)) {
            return Err(StoreError::TypeMismatch {
                name: name.to_string(),
                requested: kind,
                stored: kind.other(),
            });
        }
        Err(StoreError::NotFound {
            kind,
            name: name.to_string(),
        })
    }

    async fn get_all_metrics_slice(&self) -> StoreResult<Vec<MetricRecord>> {
        let metrics = self.metrics.read().await;
        let out = records(&metrics);
        drop(metrics);
        Ok(sorted(out))
    }

    async fn take_snapshot(&self) -> StoreResult<Vec<MetricRecord>> {
        let mut metrics = self.metrics.write().await;
        let out = records(&metrics);
        for value in metrics.values_mut() {
            if let MetricValue::Counter(delta) = value {
                *delta = 0;
            }
        }
        drop(metrics);
        Ok(sorted(out))
    }

    async fn reset(&self) -> StoreResult<()> {
        self.metrics.write().await.clear();
        Ok(())
    }
}
