//! HTTP handlers.
//!
//! Path-encoded endpoints speak plain text; the JSON endpoints accept gzip
//! bodies and answer with gzip when the client allows it.

use askama::Template;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};

use tally_core::{MetricKind, SIGNATURE_HEADER, codec};

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::receiver::{Inbound, Outbound};

fn has_gzip(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(codec::mentions_gzip)
}

fn inbound<'a>(headers: &'a HeaderMap, body: &'a [u8]) -> Inbound<'a> {
    Inbound {
        body,
        gzip: has_gzip(headers, CONTENT_ENCODING),
        signature: headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()),
    }
}

fn json_response(out: Outbound) -> Response {
    let mut resp = (StatusCode::OK, [(CONTENT_TYPE, "application/json")], out.body).into_response();
    if out.gzip {
        resp.headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }
    if let Some(sig) = out.signature.and_then(|s| HeaderValue::from_str(&s).ok()) {
        resp.headers_mut().insert(SIGNATURE_HEADER, sig);
    }
    resp
}

// ── Plain text ─────────────────────────────────────────────────

/// POST /update/{kind}/{name}/{value}
pub async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    state.receiver.receive_path(&kind, &name, &value).await?;
    Ok(StatusCode::OK)
}

/// GET /value/{kind}/{name}
pub async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind: MetricKind = kind.parse()?;
    let value = state.receiver.repo().get_metric(kind, &name).await?;
    Ok(value.to_string())
}

/// GET /ping
pub async fn ping(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.receiver.repo().ping().await?;
    Ok(StatusCode::OK)
}

// ── JSON ───────────────────────────────────────────────────────

/// POST /update
pub async fn update_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let record = state.receiver.receive_record(inbound(&headers, &body)).await?;
    let payload = codec::encode_record(&record).map_err(ApiError::Encode)?;
    let out = state
        .receiver
        .respond(payload, has_gzip(&headers, ACCEPT_ENCODING))?;
    Ok(json_response(out))
}

/// POST /updates
pub async fn update_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let batch = state.receiver.receive_batch(inbound(&headers, &body)).await?;
    let payload = codec::encode_batch(&batch).map_err(ApiError::Encode)?;
    let out = state
        .receiver
        .respond(payload, has_gzip(&headers, ACCEPT_ENCODING))?;
    Ok(json_response(out))
}

/// POST /value
pub async fn value_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let record = state.receiver.lookup(inbound(&headers, &body)).await?;
    let payload = codec::encode_record(&record).map_err(ApiError::Encode)?;
    let out = state
        .receiver
        .respond(payload, has_gzip(&headers, ACCEPT_ENCODING))?;
    Ok(json_response(out))
}

// ── Listing ────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    listing: String,
}

/// GET /
pub async fn index(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let listing = state.receiver.repo().get_all_metrics().await?;
    let page = IndexTemplate {
        listing: listing.trim_end().to_string(),
    };
    Ok(Html(page.render().unwrap_or_else(|e| {
        format!("<pre>Template error: {e}</pre>")
    })))
}
