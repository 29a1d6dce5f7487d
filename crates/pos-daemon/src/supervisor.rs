//! C7 Supervisor (§4.7): starts C1-C6 in dependency order, owns their
//! handles for the process lifetime, and tears them down in reverse on
//! shutdown.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use pos_config::TerminalConfig;
use pos_cloud::{CloudUplink, CloudUplinkConfig};
use pos_peer::{PeerClient, PeerServer};
use pos_reconcile::Reconciler;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::info;

use crate::state::{AppState, BuildInfo};

/// Everything the supervisor started, kept alive for the process lifetime.
pub struct Supervisor {
    pub state: Arc<AppState>,
    bound_peer_port: u16,
    shutdown_tx: watch::Sender<bool>,
    peer_server_task: tokio::task::JoinHandle<()>,
    cloud_uplink_task: tokio::task::JoinHandle<()>,
    reconciler_task: tokio::task::JoinHandle<()>,
}

impl Supervisor {
    /// Opens the store, binds the peer server, dials configured peers, and
    /// starts the cloud uplink and reconciler background loops, in that
    /// order (§4.7 startup sequencing: C1 -> C3 -> C4 -> C5 -> C6).
    pub async fn start(config: TerminalConfig) -> Result<Self> {
        let config = Arc::new(config);

        // C1: store.
        let pool = pos_db::connect(&config.store_path()).await?;
        pos_db::migrate(&pool).await.context("running store migrations")?;
        info!(terminal_id = %config.terminal_id, path = %config.store_path().display(), "store opened");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // C3: peer server.
        let peer_server = PeerServer::bind(pool.clone(), config.port, config.max_message_bytes).await?;
        let bound_addr = peer_server.local_addr();
        let bound_peer_port = bound_addr.port();
        info!(addr = %bound_addr, "peer server bound");
        let peer_server_task = {
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { peer_server.run(shutdown_rx).await })
        };

        // C4: peer client, one outbound connection per configured peer.
        let peer_client = Arc::new(PeerClient::start(
            pool.clone(),
            config.terminal_id.clone(),
            config.peer_terminals.clone(),
            config.sync_backoff_base_ms,
            config.sync_max_retries,
            config.max_message_bytes,
        ));

        // C5: cloud uplink (dormant if credentials are absent).
        let cloud_config = if config.cloud_disabled() {
            None
        } else {
            Some(CloudUplinkConfig {
                base_url: config.cloud_base_url.clone().unwrap(),
                service_key: config.cloud_service_key.clone().unwrap(),
                terminal_id: config.terminal_id.clone(),
                max_retries: config.sync_max_retries,
                backoff_base_ms: config.sync_backoff_base_ms,
            })
        };
        let uplink = CloudUplink::new(cloud_config);
        let cloud_uplink_task = {
            let pool = pool.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { uplink.run(&pool, shutdown_rx).await })
        };

        // C6: reconciler. One instance drives the background interval
        // loop; a second, independent instance backs the on-demand HTTP
        // trigger so the two never contend for the same `&mut self`.
        let mut background_reconciler = Reconciler::new(
            pool.clone(),
            config.terminal_id.clone(),
            config.reconcile_divergence_threshold,
            config.reconcile_interval_secs,
        );
        let on_demand_reconciler = Arc::new(Mutex::new(Reconciler::new(
            pool.clone(),
            config.terminal_id.clone(),
            config.reconcile_divergence_threshold,
            config.reconcile_interval_secs,
        )));
        let reconciler_task = {
            let peer_client = Arc::clone(&peer_client);
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { background_reconciler.run(&peer_client, shutdown_rx).await })
        };

        let state = Arc::new(AppState {
            config,
            build: BuildInfo { service: "pos-daemon", version: env!("CARGO_PKG_VERSION") },
            started_at: Instant::now(),
            pool,
            peer_client,
            on_demand_reconciler,
            last_reconcile: Arc::new(RwLock::new(None)),
        });

        Ok(Supervisor {
            state,
            bound_peer_port,
            shutdown_tx,
            peer_server_task,
            cloud_uplink_task,
            reconciler_task,
        })
    }

    /// The port the peer fabric actually bound to — `config.port`, or
    /// `config.port + 1` if the preferred port was already taken.
    pub fn bound_port(&self) -> u16 {
        self.bound_peer_port
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Signals every background task to stop and waits for each of C6, C5,
    /// C3 to wind down in that reverse order, then closes the store (§4.7:
    /// "pending drain loops are allowed to complete a single iteration, and
    /// the store is closed last"). C4 keeps its own shutdown channel (one
    /// outbound task per peer, not joinable from here) so it is signaled
    /// directly rather than through the shared watch.
    pub async fn shutdown(self) {
        info!("supervisor shutting down");
        let _ = self.shutdown_tx.send(true);
        self.state.peer_client.shutdown();

        let _ = self.reconciler_task.await;
        let _ = self.cloud_uplink_task.await;
        let _ = self.peer_server_task.await;

        self.state.pool.close().await;
        info!("store closed");
    }
}
