//! Error types for metric repositories.

use tally_core::MetricKind;
use thiserror::Error;

/// Result type alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metric {kind}/{name} not found")]
    NotFound { kind: MetricKind, name: String },

    #[error("metric {name} is stored as {stored}, not {requested}")]
    TypeMismatch {
        name: String,
        requested: MetricKind,
        stored: MetricKind,
    },

    #[error("counter {name} would overflow")]
    Overflow { name: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt stored metric: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
