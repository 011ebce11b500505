use std::time::Duration;

use http::StatusCode;
use tally_core::CodecError;
use tally_store::StoreError;

/// Errors from one push attempt.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("reading local metrics: {0}")]
    Store(#[from] StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("building request: {0}")]
    Request(#[from] http::Error),

    #[error("push timed out after {0:?}")]
    Timeout(Duration),

    #[error("server responded with {0}")]
    Status(StatusCode),

    #[error("response signature does not match")]
    SignatureInvalid,

    #[error("server echo does not match the pushed batch")]
    EchoMismatch,
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
