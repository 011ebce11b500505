//! End-to-end tests: a real agent pushing to a real server over TCP.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::net::TcpListener;
use tower::ServiceExt;

use tally_agent::{Collector, POLL_COUNT, PushClient, Sampler, SyncError, Synchronizer, SystemSampler};
use tally_core::{MetricKind, MetricRecord, MetricValue, Signer};
use tally_server::{Receiver, SnapshotPersister, build_router};
use tally_store::{InMemoryStore, Repository};

/// Serve a router for `store` on an ephemeral port and return its address.
async fn spawn_server(store: &InMemoryStore, key: Option<&str>, snapshot: Option<&Path>) -> String {
    let repo: Arc<dyn Repository> = Arc::new(store.clone());
    let persister = snapshot
        .map(|path| Arc::new(SnapshotPersister::new(Arc::clone(&repo), path, Duration::ZERO)));
    let receiver = Arc::new(Receiver::new(repo, persister, Signer::from_key(key)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, build_router(receiver)).await.unwrap();
    });
    addr
}

fn synchronizer(agent: &InMemoryStore, addr: &str, key: Option<&str>) -> Synchronizer {
    Synchronizer::new(
        Arc::new(agent.clone()),
        PushClient::new(addr, Signer::from_key(key), Duration::from_secs(5)),
        Duration::from_secs(10),
    )
}

#[tokio::test]
async fn pushed_batch_merges_into_server_state() {
    let server = InMemoryStore::new();
    server.add_counter("hits", 8).await.unwrap();
    server.add_gauge("temp", 20.1).await.unwrap();
    let addr = spawn_server(&server, None, None).await;

    let agent = InMemoryStore::new();
    agent.add_counter("hits", 2).await.unwrap();
    agent.add_gauge("temp", 1.0).await.unwrap();

    assert_eq!(synchronizer(&agent, &addr, None).push_once().await.unwrap(), 2);

    assert_eq!(
        server.get_all_metrics_slice().await.unwrap(),
        vec![MetricRecord::counter("hits", 10), MetricRecord::gauge("temp", 1.0)]
    );
}

#[tokio::test]
async fn collected_sample_reaches_the_server() {
    let server = InMemoryStore::new();
    let addr = spawn_server(&server, None, None).await;

    let agent = InMemoryStore::new();
    let agent_repo: Arc<dyn Repository> = Arc::new(agent.clone());
    let mut collector = Collector::new(
        Arc::clone(&agent_repo),
        Box::new(SystemSampler::new()),
        Duration::from_secs(2),
    );
    collector.collect().await.unwrap();

    let pushed = synchronizer(&agent, &addr, None).push_once().await.unwrap();
    assert_eq!(pushed, agent.len().await);

    assert_eq!(
        server.get_metric(MetricKind::Counter, POLL_COUNT).await.unwrap(),
        MetricValue::Counter(1)
    );
    assert!(server.get_metric(MetricKind::Gauge, "RandomValue").await.is_ok());
    assert!(server.get_metric(MetricKind::Gauge, "TotalMemory").await.is_ok());
}

/// Reports nothing, so each collect only bumps the poll count.
struct Idle;

impl Sampler for Idle {
    fn sample(&mut self) -> Vec<MetricRecord> {
        Vec::new()
    }
}

#[tokio::test]
async fn server_poll_count_matches_agent_polls() {
    let server = InMemoryStore::new();
    let addr = spawn_server(&server, None, None).await;

    let agent = InMemoryStore::new();
    let mut collector = Collector::new(Arc::new(agent.clone()), Box::new(Idle), Duration::from_secs(2));
    let sync = synchronizer(&agent, &addr, None);
    for _ in 0..3 {
        collector.collect().await.unwrap();
        sync.push_once().await.unwrap();
    }
    // A push with no new polls adds nothing.
    sync.push_once().await.unwrap();

    assert_eq!(
        server.get_metric(MetricKind::Counter, POLL_COUNT).await.unwrap(),
        MetricValue::Counter(3)
    );
}

#[tokio::test]
async fn gauge_survives_the_round_trip_bit_for_bit() {
    let server = InMemoryStore::new();
    let addr = spawn_server(&server, None, None).await;

    let agent = InMemoryStore::new();
    agent.add_gauge("RandomValue", 0.9856906946328695).await.unwrap();
    synchronizer(&agent, &addr, None).push_once().await.unwrap();

    assert_eq!(
        server.get_metric(MetricKind::Gauge, "RandomValue").await.unwrap(),
        MetricValue::Gauge(0.9856906946328695)
    );
}

#[tokio::test]
async fn signed_push_is_accepted_and_response_verified() {
    let server = InMemoryStore::new();
    let addr = spawn_server(&server, Some("secret"), None).await;

    let agent = InMemoryStore::new();
    agent.add_counter("hits", 1).await.unwrap();

    synchronizer(&agent, &addr, Some("secret"))
        .push_once()
        .await
        .unwrap();
    assert_eq!(
        server.get_metric(MetricKind::Counter, "hits").await.unwrap(),
        MetricValue::Counter(1)
    );
}

#[tokio::test]
async fn push_with_wrong_key_is_refused() {
    let server = InMemoryStore::new();
    let addr = spawn_server(&server, Some("secret"), None).await;

    let agent = InMemoryStore::new();
    agent.add_counter("hits", 1).await.unwrap();

    let err = synchronizer(&agent, &addr, Some("wrong"))
        .push_once()
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Status(StatusCode::BAD_REQUEST)));

    let err = synchronizer(&agent, &addr, None).push_once().await.unwrap_err();
    assert!(matches!(err, SyncError::Status(StatusCode::BAD_REQUEST)));

    assert!(server.is_empty().await);
}

#[tokio::test]
async fn snapshot_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    // First server flushes synchronously after every batch.
    let first = InMemoryStore::new();
    let addr = spawn_server(&first, None, Some(&path)).await;
    let agent = InMemoryStore::new();
    agent.add_counter("hits", 5).await.unwrap();
    agent.add_gauge("temp", 20.1).await.unwrap();
    synchronizer(&agent, &addr, None).push_once().await.unwrap();

    // Second server restores from the same file. A repeated restore, as
    // with a backend that kept its rows, leaves the state alone.
    let second = InMemoryStore::new();
    let persister = SnapshotPersister::new(Arc::new(second.clone()), &path, Duration::ZERO);
    assert_eq!(persister.restore().await.unwrap(), 2);
    assert_eq!(persister.restore().await.unwrap(), 0);
    assert_eq!(
        second.get_all_metrics_slice().await.unwrap(),
        first.get_all_metrics_slice().await.unwrap()
    );

    let router = build_router(Arc::new(Receiver::new(Arc::new(second), None, None)));
    let resp = router
        .oneshot(
            Request::builder()
                .uri("/value/counter/hits")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"5");
}

#[tokio::test]
async fn concurrent_pushes_sum_counters() {
    let server = InMemoryStore::new();
    let addr = spawn_server(&server, None, None).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let addr = addr.clone();
        handles.push(tokio::spawn(async move {
            let agent = InMemoryStore::new();
            agent.add_counter("hits", 3).await.unwrap();
            synchronizer(&agent, &addr, None).push_once().await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(
        server.get_metric(MetricKind::Counter, "hits").await.unwrap(),
        MetricValue::Counter(24)
    );
}
