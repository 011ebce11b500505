//! Batch codec: JSON encoding plus gzip framing.
//!
//! The agent encodes a batch, compresses it, and (optionally) signs the
//! compressed bytes. The server reverses the steps in the opposite order.
//! The snapshot file uses the same JSON array encoding, uncompressed.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

use crate::types::{MetricKind, MetricRecord};

/// Result type alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while parsing, encoding, or decoding metrics.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown metric type {0:?}")]
    UnknownKind(String),

    #[error("metric {name:?}: {kind} requires a `{field}` field")]
    MissingField {
        name: String,
        kind: MetricKind,
        field: &'static str,
    },

    #[error("invalid {kind} value {raw:?}")]
    InvalidValue { kind: MetricKind, raw: String },

    #[error("metric name is empty")]
    EmptyName,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("gzip error: {0}")]
    Gzip(#[from] std::io::Error),
}

/// Encode a batch as a compact JSON array.
pub fn encode_batch(records: &[MetricRecord]) -> CodecResult<Vec<u8>> {
    Ok(serde_json::to_vec(records)?)
}

/// Decode a JSON array of records, validating each one.
pub fn decode_batch(bytes: &[u8]) -> CodecResult<Vec<MetricRecord>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a single record as JSON.
pub fn encode_record(record: &MetricRecord) -> CodecResult<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

/// Decode and validate a single JSON record.
pub fn decode_record(bytes: &[u8]) -> CodecResult<MetricRecord> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Gzip-compress a byte buffer.
pub fn compress(bytes: &[u8]) -> CodecResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip stream.
pub fn decompress(bytes: &[u8]) -> CodecResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Whether a `Content-Encoding`/`Accept-Encoding` header value names gzip.
pub fn mentions_gzip(header_value: &str) -> bool {
    header_value
        .split(',')
        .any(|part| part.split(';').next().is_some_and(|enc| enc.trim().eq_ignore_ascii_case("gzip")))
}
