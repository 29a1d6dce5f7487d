//! In-process scenario tests for pos-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket or
//! starting any background task. Each test calls `routes::build_router` and
//! drives it via `tower::ServiceExt::oneshot` against a hand-assembled
//! `AppState` — no peer connections, no cloud uplink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pos_config::TerminalConfig;
use pos_daemon::state::AppState;
use pos_daemon::{routes, state::BuildInfo};
use pos_peer::PeerClient;
use pos_reconcile::Reconciler;
use pos_testkit::seeded_pool;
use tokio::sync::{Mutex, RwLock};
use tower::ServiceExt; // oneshot

fn sample_config() -> TerminalConfig {
    TerminalConfig {
        terminal_id: "L1".to_string(),
        port: 9100,
        peer_terminals: vec![],
        cloud_base_url: None,
        cloud_service_key: None,
        sync_backoff_base_ms: 2000,
        sync_max_retries: 10,
        reconcile_interval_secs: 600,
        reconcile_divergence_threshold: 10,
        max_message_bytes: 1_048_576,
        data_dir: PathBuf::from("/tmp/pos-daemon-tests"),
    }
}

async fn make_router() -> axum::Router {
    let pool = seeded_pool("p1", 100).await.unwrap();
    let config = Arc::new(sample_config());
    let peer_client = Arc::new(PeerClient::start(
        pool.clone(),
        config.terminal_id.clone(),
        config.peer_terminals.clone(),
        config.sync_backoff_base_ms,
        config.sync_max_retries,
        config.max_message_bytes,
    ));
    let reconciler = Reconciler::new(
        pool.clone(),
        config.terminal_id.clone(),
        config.reconcile_divergence_threshold,
        config.reconcile_interval_secs,
    );

    let st = Arc::new(AppState {
        config,
        build: BuildInfo { service: "pos-daemon", version: "0.1.0" },
        started_at: Instant::now(),
        pool,
        peer_client,
        on_demand_reconciler: Arc::new(Mutex::new(reconciler)),
        last_reconcile: Arc::new(RwLock::new(None)),
    });
    routes::build_router(st)
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

#[tokio::test]
async fn health_returns_200_ok_true() {
    let router = make_router().await;
    let req = Request::builder().method("GET").uri("/v1/health").body(axum::body::Body::empty()).unwrap();

    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "pos-daemon");
}

#[tokio::test]
async fn status_reports_empty_outbox_and_no_peers() {
    let router = make_router().await;
    let req = Request::builder().method("GET").uri("/v1/status").body(axum::body::Body::empty()).unwrap();

    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["terminal_id"], "L1");
    assert_eq!(json["cloud_dormant"], true);
    assert_eq!(json["outbox_pending"], 0);
    assert_eq!(json["peer_connections"], serde_json::json!({}));
    assert!(json["last_reconcile"].is_null());
}

#[tokio::test]
async fn reconcile_runs_a_pass_with_no_peers_and_records_a_summary() {
    let router = make_router().await;
    let req = Request::builder().method("POST").uri("/v1/reconcile").body(axum::body::Body::empty()).unwrap();

    let (status, body) = call(router.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["summary"]["ok"], true);

    // The summary is now visible from /v1/status too.
    let req = Request::builder().method("GET").uri("/v1/status").body(axum::body::Body::empty()).unwrap();
    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["last_reconcile"]["ok"], true);
}
