//! Request and response types for all pos-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state::ReconcileSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// `GET /v1/status` — connection table, outbox backlog, last reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub terminal_id: String,
    pub daemon_uptime_secs: u64,
    pub cloud_dormant: bool,
    pub peer_connections: HashMap<String, String>,
    pub outbox_pending: i64,
    pub outbox_peer_ack: i64,
    pub outbox_error: i64,
    pub last_reconcile: Option<ReconcileSummary>,
}

/// `POST /v1/reconcile` — the report from the triggered pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub summary: ReconcileSummary,
}
