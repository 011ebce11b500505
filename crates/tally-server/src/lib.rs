//! tally-server: HTTP ingestion and query surface for tally.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/update/{kind}/{name}/{value}` | Apply one path-encoded update |
//! | GET | `/value/{kind}/{name}` | Read one value as plain text |
//! | POST | `/update` | Apply one JSON record, echo it |
//! | POST | `/updates` | Apply a JSON batch, echo it |
//! | POST | `/value` | Look up one record by `{id, type}` |
//! | GET | `/` | HTML listing of every metric |
//! | GET | `/ping` | Storage health |

pub mod error;
pub mod handlers;
pub mod persist;
pub mod receiver;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tracing::info;

pub use error::{ApiError, ApiResult, PersistError, PersistResult};
pub use persist::SnapshotPersister;
pub use receiver::Receiver;

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<Receiver>,
}

/// Build the complete router.
pub fn build_router(receiver: Arc<Receiver>) -> Router {
    let state = AppState { receiver };

    Router::new()
        .route("/", get(handlers::index))
        .route("/ping", get(handlers::ping))
        .route("/update", post(handlers::update_json))
        .route("/update/", post(handlers::update_json))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_path))
        .route("/updates", post(handlers::update_batch))
        .route("/updates/", post(handlers::update_batch))
        .route("/value", post(handlers::value_json))
        .route("/value/", post(handlers::value_json))
        .route("/value/{kind}/{name}", get(handlers::value_path))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    let resp = next.run(req).await;

    info!(
        %method,
        %uri,
        status = resp.status().as_u16(),
        elapsed_us = started.elapsed().as_micros() as u64,
        "request"
    );
    resp
}
