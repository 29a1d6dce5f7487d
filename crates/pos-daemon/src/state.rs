//! Shared runtime state for pos-daemon.
//!
//! All types here are `Clone`-able (via `Arc`). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;
use std::time::Instant;

use pos_config::TerminalConfig;
use pos_peer::PeerClient;
use pos_reconcile::Reconciler;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Outcome of the most recent reconciliation pass, background or on-demand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub ran_at: chrono::DateTime<chrono::Utc>,
    pub ok: bool,
    pub error: Option<String>,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TerminalConfig>,
    pub build: BuildInfo,
    pub started_at: Instant,
    pub pool: SqlitePool,
    /// Shared with the background drain/connect tasks started by the supervisor.
    pub peer_client: Arc<PeerClient>,
    /// An on-demand reconciler instance, independent of the one driving the
    /// background interval loop (§4.7): `POST /v1/reconcile` locks and ticks
    /// this one directly rather than racing the timer-driven loop for the
    /// same `&mut Reconciler`.
    pub on_demand_reconciler: Arc<Mutex<Reconciler>>,
    pub last_reconcile: Arc<RwLock<Option<ReconcileSummary>>>,
}

impl AppState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
