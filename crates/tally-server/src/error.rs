use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use tally_core::CodecError;
use tally_store::StoreError;

/// Errors surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("signature does not match request body")]
    SignatureInvalid,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("encoding response: {0}")]
    Encode(#[source] CodecError),
}

impl From<CodecError> for ApiError {
    fn from(e: CodecError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::SignatureInvalid
            | ApiError::Store(StoreError::Overflow { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::NotFound { .. } | StoreError::TypeMismatch { .. }) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Store(_) | ApiError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Snapshot file failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("snapshot file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("snapshot decode: {0}")]
    Decode(#[from] CodecError),

    #[error("snapshot apply: {0}")]
    Store(#[from] StoreError),
}

pub type PersistResult<T> = std::result::Result<T, PersistError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::MetricKind;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::SignatureInvalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Store(StoreError::NotFound {
                kind: MetricKind::Gauge,
                name: "x".into()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Store(StoreError::TypeMismatch {
                name: "x".into(),
                requested: MetricKind::Gauge,
                stored: MetricKind::Counter,
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Store(StoreError::Overflow { name: "x".into() }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Store(StoreError::Unavailable("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn codec_errors_are_validation_failures() {
        let err: ApiError = CodecError::EmptyName.into();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
