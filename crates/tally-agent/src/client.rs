//! PushClient: posts metric batches to the server over HTTP/1.1.
//!
//! One connection per push, driven by hyper's low-level client. The body is
//! gzip-compressed JSON; when a key is configured the compressed bytes are
//! signed into the `HashSHA256` header. The server's echo is checked before
//! the push counts as delivered.

use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, HOST, USER_AGENT};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use tally_core::{MetricRecord, SIGNATURE_HEADER, Signer, codec};

use crate::error::{SyncError, SyncResult};

const UPDATES_PATH: &str = "/updates";

/// HTTP client for the server's batch endpoint.
#[derive(Debug, Clone)]
pub struct PushClient {
    address: String,
    signer: Option<Signer>,
    timeout: Duration,
}

struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl PushClient {
    /// `address` is `host:port`; a leading `http://` is tolerated.
    pub fn new(address: &str, signer: Option<Signer>, timeout: Duration) -> Self {
        let address = address
            .strip_prefix("http://")
            .unwrap_or(address)
            .trim_end_matches('/')
            .to_string();
        Self {
            address,
            signer,
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Push one batch and verify the server echoed it back unchanged.
    pub async fn push_batch(&self, batch: &[MetricRecord]) -> SyncResult<()> {
        let payload = codec::encode_batch(batch)?;
        let body = codec::compress(&payload)?;
        let signature = self.signer.as_ref().map(|s| s.sign(&body));

        let response = tokio::time::timeout(self.timeout, self.post(UPDATES_PATH, body, signature))
            .await
            .map_err(|_| SyncError::Timeout(self.timeout))??;

        if response.status != StatusCode::OK {
            return Err(SyncError::Status(response.status));
        }

        if let (Some(signer), Some(sig)) = (&self.signer, response.headers.get(SIGNATURE_HEADER)) {
            let sig = sig.to_str().map_err(|_| SyncError::SignatureInvalid)?;
            if !signer.verify(&response.body, sig) {
                return Err(SyncError::SignatureInvalid);
            }
        }

        let compressed = response
            .headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(codec::mentions_gzip);
        let echo = if compressed {
            codec::decompress(&response.body)?
        } else {
            response.body.to_vec()
        };

        let echoed = codec::decode_batch(&echo)?;
        if echoed != batch {
            return Err(SyncError::EchoMismatch);
        }
        Ok(())
    }

    async fn post(
        &self,
        path: &str,
        body: Vec<u8>,
        signature: Option<String>,
    ) -> SyncResult<RawResponse> {
        let stream = TcpStream::connect(self.address.as_str())
            .await
            .map_err(|source| SyncError::Connect {
                address: self.address.clone(),
                source,
            })?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "push connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(HOST, &self.address)
            .header(USER_AGENT, concat!("tally-agent/", env!("CARGO_PKG_VERSION")))
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(ACCEPT_ENCODING, "gzip");
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        let req = builder.body(Full::new(Bytes::from(body)))?;

        let resp = sender.send_request(req).await?;
        let (parts, body) = resp.into_parts();
        let body = body.collect().await?.to_bytes();

        debug!(status = %parts.status, bytes = body.len(), path, "push response");
        Ok(RawResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
