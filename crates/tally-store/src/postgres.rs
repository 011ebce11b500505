//! RelationalStore: PostgreSQL-backed repository.
//!
//! Every operation runs inside one transaction. Counter arithmetic happens
//! in the upsert itself (`delta = metrics.delta + EXCLUDED.delta`), so there
//! is no read round-trip and isolation is left to the database. Uniqueness
//! of `(mtype, id)` is enforced by an index created in `bootstrap`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use tally_core::{MetricKind, MetricRecord, MetricValue};

use crate::error::{StoreError, StoreResult};
use crate::repository::Repository;

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS metrics (
        id    VARCHAR(128) NOT NULL,
        mtype VARCHAR(16)  NOT NULL,
        delta BIGINT DEFAULT NULL,
        value DOUBLE PRECISION DEFAULT NULL
    )";

const CREATE_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS metrics_mtype_id ON metrics (mtype, id)";

const UPSERT_GAUGE: &str = "
    INSERT INTO metrics (id, mtype, value)
    VALUES ($1, 'gauge', $2)
    ON CONFLICT (mtype, id)
    DO UPDATE SET value = EXCLUDED.value";

const UPSERT_COUNTER: &str = "
    INSERT INTO metrics (id, mtype, delta)
    VALUES ($1, 'counter', $2)
    ON CONFLICT (mtype, id)
    DO UPDATE SET delta = metrics.delta + EXCLUDED.delta";

const SELECT_BY_NAME: &str = "SELECT id, mtype, delta, value FROM metrics WHERE id = $1";

const SELECT_ALL: &str = "SELECT id, mtype, delta, value FROM metrics ORDER BY mtype, id";

// Writers wait; plain readers do not.
const LOCK_FOR_SNAPSHOT: &str = "LOCK TABLE metrics IN EXCLUSIVE MODE";

const DRAIN_COUNTERS: &str = "UPDATE metrics SET delta = 0 WHERE mtype = 'counter'";

/// SQLSTATE `numeric_value_out_of_range`, raised when a BIGINT sum overflows.
const NUMERIC_OUT_OF_RANGE: &str = "22003";

type MetricRow = (String, String, Option<i64>, Option<f64>);

/// Repository backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct RelationalStore {
    pool: PgPool,
}

impl RelationalStore {
    /// Connect to the database, failing fast if it is unreachable.
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        info!("connected to metrics database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn upsert_error(name: &str, e: sqlx::Error) -> StoreError {
    let overflow = matches!(
        &e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(NUMERIC_OUT_OF_RANGE)
    );
    if overflow {
        StoreError::Overflow {
            name: name.to_string(),
        }
    } else {
        e.into()
    }
}

fn row_to_record((id, mtype, delta, value): MetricRow) -> StoreResult<MetricRecord> {
    let kind: MetricKind = mtype
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("{id}: unknown type {mtype:?}")))?;
    let value = match kind {
        MetricKind::Gauge => value.map(MetricValue::Gauge),
        MetricKind::Counter => delta.map(MetricValue::Counter),
    }
    .ok_or_else(|| StoreError::Corrupt(format!("{id}: {kind} without a value")))?;
    Ok(MetricRecord { name: id, value })
}

#[async_trait]
impl Repository for RelationalStore {
    async fn bootstrap(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(CREATE_TABLE).execute(&mut *tx).await?;
        sqlx::query(CREATE_INDEX).execute(&mut *tx).await?;
        tx.commit().await?;
        debug!("metrics table ready");
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn add_gauge(&self, name: &str, value: f64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(UPSERT_GAUGE)
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_counter(&self, name: &str, delta: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(UPSERT_COUNTER)
            .bind(name)
            .bind(delta)
            .execute(&mut *tx)
            .await
            .map_err(|e| upsert_error(name, e))?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_many(&self, records: &[MetricRecord]) -> StoreResult<()> {
        // Dropping `tx` on an early return rolls the whole batch back.
        let mut tx = self.pool.begin().await?;
        for record in records {
            let query = match record.value {
                MetricValue::Gauge(v) => sqlx::query(UPSERT_GAUGE).bind(record.name.as_str()).bind(v),
                MetricValue::Counter(d) => sqlx::query(UPSERT_COUNTER).bind(record.name.as_str()).bind(d),
            };
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| upsert_error(&record.name, e))?;
        }
        tx.commit().await?;
        debug!(count = records.len(), "batch committed");
        Ok(())
    }

    async fn get_metric(&self, kind: MetricKind, name: &str) -> StoreResult<MetricValue> {
        let rows: Vec<MetricRow> = sqlx::query_as(SELECT_BY_NAME)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound {
                kind,
                name: name.to_string(),
            });
        }
        for row in rows {
            let record = row_to_record(row)?;
            if record.kind() == kind {
                return Ok(record.value);
            }
        }
        Err(StoreError::TypeMismatch {
            name: name.to_string(),
            requested: kind,
            stored: kind.other(),
        })
    }

    async fn get_all_metrics_slice(&self) -> StoreResult<Vec<MetricRecord>> {
        let rows: Vec<MetricRow> = sqlx::query_as(SELECT_ALL).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_record).collect()
    }

    async fn take_snapshot(&self) -> StoreResult<Vec<MetricRecord>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(LOCK_FOR_SNAPSHOT).execute(&mut *tx).await?;
        let rows: Vec<MetricRow> = sqlx::query_as(SELECT_ALL).fetch_all(&mut *tx).await?;
        sqlx::query(DRAIN_COUNTERS).execute(&mut *tx).await?;
        tx.commit().await?;
        rows.into_iter().map(row_to_record).collect()
    }

    async fn reset(&self) -> StoreResult<()> {
        sqlx::query("TRUNCATE metrics").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_convert_by_kind() {
        let gauge = row_to_record(("temp".into(), "gauge".into(), None, Some(20.1))).unwrap();
        assert_eq!(gauge, MetricRecord::gauge("temp", 20.1));

        let counter = row_to_record(("hits".into(), "counter".into(), Some(8), None)).unwrap();
        assert_eq!(counter, MetricRecord::counter("hits", 8));
    }

    #[test]
    fn corrupt_rows_are_reported() {
        assert!(matches!(
            row_to_record(("x".into(), "gauge".into(), Some(1), None)),
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(
            row_to_record(("x".into(), "histogram".into(), None, Some(1.0))),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn upserts_do_arithmetic_in_the_database() {
        assert!(UPSERT_COUNTER.contains("delta = metrics.delta + EXCLUDED.delta"));
        assert!(UPSERT_GAUGE.contains("value = EXCLUDED.value"));
        assert!(CREATE_INDEX.contains("(mtype, id)"));
        assert!(DRAIN_COUNTERS.contains("WHERE mtype = 'counter'"));
    }

    #[tokio::test]
    async fn unreachable_database_is_unavailable() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy("postgres://tally@127.0.0.1:1/tally")
            .unwrap();
        let store = RelationalStore::from_pool(pool);

        assert!(matches!(
            store.add_gauge("temp", 1.0).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
    }
}
