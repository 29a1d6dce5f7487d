//! Axum router and all HTTP handlers for pos-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{collections::HashMap, sync::Arc};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use pos_peer::ConnectionState;
use tracing::{info, warn};

use crate::{
    api_types::{HealthResponse, ReconcileResponse, StatusResponse},
    state::{AppState, ReconcileSummary},
};

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/reconcile", axum::routing::post(reconcile))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let peer_connections: HashMap<String, String> = st
        .peer_client
        .connection_states()
        .into_iter()
        .map(|(url, state)| (url, connection_state_label(state).to_string()))
        .collect();

    let outbox_pending = pos_db::outbox_count_by_status(&st.pool, "pending")
        .await
        .unwrap_or(-1);
    let outbox_peer_ack = pos_db::outbox_count_by_status(&st.pool, "peer_ack")
        .await
        .unwrap_or(-1);
    let outbox_error = pos_db::outbox_count_by_status(&st.pool, "error")
        .await
        .unwrap_or(-1);

    let last_reconcile = st.last_reconcile.read().await.clone();

    (
        StatusCode::OK,
        Json(StatusResponse {
            terminal_id: st.config.terminal_id.clone(),
            daemon_uptime_secs: st.uptime_secs(),
            cloud_dormant: st.config.cloud_disabled(),
            peer_connections,
            outbox_pending,
            outbox_peer_ack,
            outbox_error,
            last_reconcile,
        }),
    )
}

fn connection_state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Backoff => "backoff",
    }
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile
// ---------------------------------------------------------------------------

/// Triggers an immediate reconciliation pass and returns its report (§4.7).
///
/// Locks a reconciler instance distinct from the one driving the background
/// interval loop, so an operator-initiated pass never blocks on (or races)
/// the timer-driven one.
pub(crate) async fn reconcile(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut reconciler = st.on_demand_reconciler.lock().await;
    let result = reconciler.tick_once(&st.peer_client).await;

    let summary = match &result {
        Ok(()) => {
            info!("on-demand reconciliation pass completed");
            ReconcileSummary { ran_at: Utc::now(), ok: true, error: None }
        }
        Err(e) => {
            warn!(error = %e, "on-demand reconciliation pass failed");
            ReconcileSummary { ran_at: Utc::now(), ok: false, error: Some(e.to_string()) }
        }
    };
    drop(reconciler);

    *st.last_reconcile.write().await = Some(summary.clone());

    let status = if result.is_ok() { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    (status, Json(ReconcileResponse { summary }))
}
