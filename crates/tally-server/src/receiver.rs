//! Receiver: the server side of the push path.
//!
//! Order matters: the signature is checked over the raw request bytes
//! before anything is decompressed or decoded. Decoded records are applied
//! with one `add_many`; in synchronous persistence mode the snapshot is
//! flushed before the response goes out.

use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, warn};

use tally_core::{MetricKind, MetricRecord, MetricValue, Signer, codec};
use tally_store::Repository;

use crate::error::{ApiError, ApiResult};
use crate::persist::SnapshotPersister;

#[derive(Deserialize)]
struct ValueQuery {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Body and transport metadata of an inbound JSON request.
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    pub body: &'a [u8],
    /// `Content-Encoding` names gzip.
    pub gzip: bool,
    /// Value of the signature header, if present.
    pub signature: Option<&'a str>,
}

/// Encoded response body plus the headers it needs.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub body: Bytes,
    pub gzip: bool,
    pub signature: Option<String>,
}

pub struct Receiver {
    repo: Arc<dyn Repository>,
    persister: Option<Arc<SnapshotPersister>>,
    signer: Option<Signer>,
}

impl Receiver {
    pub fn new(
        repo: Arc<dyn Repository>,
        persister: Option<Arc<SnapshotPersister>>,
        signer: Option<Signer>,
    ) -> Self {
        Self {
            repo,
            persister,
            signer,
        }
    }

    pub fn repo(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// With a key configured, a request must carry a matching signature.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> ApiResult<()> {
        let Some(signer) = &self.signer else {
            return Ok(());
        };
        match signature {
            Some(sig) if signer.verify(body, sig) => Ok(()),
            _ => Err(ApiError::SignatureInvalid),
        }
    }

    /// Verify, decode, and apply a batch. Returns the applied records.
    pub async fn receive_batch(&self, req: Inbound<'_>) -> ApiResult<Vec<MetricRecord>> {
        self.verify(req.body, req.signature)?;
        let payload = inflate(req.body, req.gzip)?;
        let batch = codec::decode_batch(&payload)?;

        self.repo.add_many(&batch).await?;
        debug!(count = batch.len(), "batch applied");
        self.after_write().await;
        Ok(batch)
    }

    /// Decode and apply one JSON record.
    pub async fn receive_record(&self, req: Inbound<'_>) -> ApiResult<MetricRecord> {
        let payload = inflate(req.body, req.gzip)?;
        let record = codec::decode_record(&payload)?;
        self.apply(&record).await?;
        Ok(record)
    }

    /// Resolve a JSON `{"id", "type"}` lookup into the full stored record.
    pub async fn lookup(&self, req: Inbound<'_>) -> ApiResult<MetricRecord> {
        let payload = inflate(req.body, req.gzip)?;
        let query: ValueQuery = serde_json::from_slice(&payload)
            .map_err(|e| ApiError::Validation(format!("bad lookup body: {e}")))?;
        let kind: MetricKind = query.kind.parse()?;
        if query.id.is_empty() {
            return Err(ApiError::Validation("metric name is empty".into()));
        }
        let value = self.repo.get_metric(kind, &query.id).await?;
        Ok(MetricRecord {
            name: query.id,
            value,
        })
    }

    /// Apply a path-encoded update. Both parts are validated before the
    /// repository is touched.
    pub async fn receive_path(&self, kind: &str, name: &str, raw: &str) -> ApiResult<()> {
        let kind: MetricKind = kind.parse()?;
        if name.is_empty() {
            return Err(ApiError::Validation("metric name is empty".into()));
        }
        let value = MetricValue::parse(kind, raw)?;
        self.apply(&MetricRecord {
            name: name.to_string(),
            value,
        })
        .await
    }

    /// Encode a JSON response, compressing it when the client accepts gzip
    /// and signing the final bytes when a key is configured.
    pub fn respond(&self, payload: Vec<u8>, accept_gzip: bool) -> ApiResult<Outbound> {
        let body = if accept_gzip {
            codec::compress(&payload).map_err(ApiError::Encode)?
        } else {
            payload
        };
        let signature = self.signer.as_ref().map(|s| s.sign(&body));
        Ok(Outbound {
            body: Bytes::from(body),
            gzip: accept_gzip,
            signature,
        })
    }

    async fn apply(&self, record: &MetricRecord) -> ApiResult<()> {
        self.repo.add(record).await?;
        self.after_write().await;
        Ok(())
    }

    /// Synchronous-mode flush. A failure is logged; the write itself
    /// already succeeded.
    async fn after_write(&self) {
        if let Some(persister) = self.persister.as_ref().filter(|p| p.is_sync()) {
            if let Err(e) = persister.flush().await {
                warn!(error = %e, "synchronous snapshot flush failed");
            }
        }
    }
}

fn inflate(body: &[u8], gzip: bool) -> ApiResult<Vec<u8>> {
    if gzip {
        codec::decompress(body).map_err(|e| ApiError::Validation(format!("bad gzip body: {e}")))
    } else {
        Ok(body.to_vec())
    }
}
