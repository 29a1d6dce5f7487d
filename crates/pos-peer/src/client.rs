//! C4 PeerClient (§4.3): one outbound connection per configured peer URL,
//! draining `pending` outbox rows to whichever peers are currently
//! connected and tracking per-row pending ACKs.

use crate::connection::{recv_frame, send_frame, RecvOutcome};
use anyhow::{Context, Result};
use pos_db::AckStage;
use pos_schemas::envelope::{
    InventorySnapshotRow, PeerEnvelope, PeerFrame, PeerReply, ReconcileFrame,
};
use rand::Rng;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DRAIN_INTERVAL: Duration = Duration::from_millis(1000);
const ACK_CHECK_INTERVAL: Duration = Duration::from_millis(250);
const DRAIN_BATCH_LIMIT: i64 = 200;
const MAX_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

enum Command {
    RequestInventorySnapshot {
        reply: oneshot::Sender<Result<InventorySnapshot>>,
    },
}

/// A peer's inventory snapshot together with the moment it was generated,
/// so a caller can reject a stale/duplicate response (§4.6 monotonicity
/// watermark) without re-deriving it from the rows themselves.
#[derive(Debug, Clone)]
pub struct InventorySnapshot {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub rows: Vec<InventorySnapshotRow>,
}

struct PeerHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

/// Owns one background task per configured peer URL. Dropping this value
/// does not stop the tasks; call `shutdown()` and let them drain.
pub struct PeerClient {
    handles: HashMap<String, PeerHandle>,
    shutdown_tx: watch::Sender<bool>,
}

impl PeerClient {
    pub fn start(
        pool: SqlitePool,
        terminal_id: String,
        peer_urls: Vec<String>,
        backoff_base_ms: u64,
        max_retries: u32,
        max_message_bytes: usize,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = HashMap::new();

        for url in peer_urls {
            let (cmd_tx, cmd_rx) = mpsc::channel(16);
            let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
            tokio::spawn(peer_actor(
                url.clone(),
                pool.clone(),
                terminal_id.clone(),
                backoff_base_ms,
                max_retries,
                max_message_bytes,
                cmd_rx,
                state_tx,
                shutdown_rx.clone(),
            ));
            handles.insert(
                url,
                PeerHandle {
                    commands: cmd_tx,
                    state: state_rx,
                },
            );
        }

        PeerClient { handles, shutdown_tx }
    }

    pub fn connection_states(&self) -> HashMap<String, ConnectionState> {
        self.handles
            .iter()
            .map(|(url, handle)| (url.clone(), *handle.state.borrow()))
            .collect()
    }

    /// Issues a reconciliation snapshot request over `peer_url`'s connection
    /// and waits for the matching response (§4.3 sub-protocol).
    pub async fn request_inventory_snapshot(
        &self,
        peer_url: &str,
    ) -> Result<InventorySnapshot> {
        let handle = self
            .handles
            .get(peer_url)
            .with_context(|| format!("{peer_url} is not a configured peer"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .commands
            .send(Command::RequestInventorySnapshot { reply: reply_tx })
            .await
            .map_err(|_| anyhow::anyhow!("peer actor for {peer_url} is gone"))?;
        reply_rx
            .await
            .context("peer actor dropped the reply channel")?
    }

    pub fn peer_urls(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let capped_attempt = attempt.min(10);
    let exp = base_ms.saturating_mul(1u64 << capped_attempt);
    let capped = exp.min(MAX_BACKOFF_MS);
    let jitter_bound = (capped / 5).max(1);
    let jitter = rand::thread_rng().gen_range(0..=jitter_bound);
    Duration::from_millis(capped.saturating_add(jitter))
}

async fn peer_actor(
    url: String,
    pool: SqlitePool,
    terminal_id: String,
    backoff_base_ms: u64,
    max_retries: u32,
    max_message_bytes: usize,
    mut commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        let _ = state.send(ConnectionState::Connecting);
        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws, _)) => {
                info!(peer = %url, "connected to peer");
                attempt = 0;
                let _ = state.send(ConnectionState::Connected);
                let exit = run_connected(
                    ws,
                    &pool,
                    &terminal_id,
                    backoff_base_ms,
                    max_retries,
                    max_message_bytes,
                    &mut commands,
                    &mut shutdown,
                )
                .await;
                if matches!(exit, ExitReason::ShuttingDown) {
                    let _ = state.send(ConnectionState::Disconnected);
                    return;
                }
            }
            Err(e) => {
                warn!(peer = %url, error = %e, "failed to connect to peer");
            }
        }

        let _ = state.send(ConnectionState::Backoff);
        let delay = backoff_delay(backoff_base_ms, attempt);
        attempt = attempt.saturating_add(1);
        if wait_with_commands(delay, &mut commands, &mut shutdown).await {
            return;
        }
    }
}

/// Sleeps `delay`, rejecting any command that arrives in the meantime since
/// there is no live connection to serve it. Returns `true` if the caller
/// should stop retrying entirely (shutdown requested, or every handle to
/// this peer was dropped).
async fn wait_with_commands(
    delay: Duration,
    commands: &mut mpsc::Receiver<Command>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::RequestInventorySnapshot { reply }) => {
                        let _ = reply.send(Err(anyhow::anyhow!("peer is not connected")));
                    }
                    None => return true,
                }
            }
        }
    }
}

enum ExitReason {
    Disconnected,
    ShuttingDown,
}

async fn run_connected(
    mut ws: ClientWs,
    pool: &SqlitePool,
    terminal_id: &str,
    backoff_base_ms: u64,
    max_retries: u32,
    max_message_bytes: usize,
    commands: &mut mpsc::Receiver<Command>,
    shutdown: &mut watch::Receiver<bool>,
) -> ExitReason {
    let mut pending_acks: HashMap<String, Instant> = HashMap::new();
    let mut pending_reconcile: Option<(String, oneshot::Sender<Result<InventorySnapshot>>)> = None;
    let mut drain_tick = tokio::time::interval(DRAIN_INTERVAL);
    let mut ack_tick = tokio::time::interval(ACK_CHECK_INTERVAL);

    loop {
        tokio::select! {
            frame = recv_frame(&mut ws, max_message_bytes) => {
                let frame = match frame {
                    Ok(RecvOutcome::Frame(f)) => f,
                    Ok(RecvOutcome::Closed) => return ExitReason::Disconnected,
                    Ok(RecvOutcome::Malformed(reason)) => {
                        warn!(peer = %terminal_id, %reason, "malformed frame from peer, replying with an error and continuing");
                        if let Err(e) = send_frame(&mut ws, &PeerFrame::Reply(PeerReply::Error { reason })).await {
                            warn!(peer = %terminal_id, error = %e, "failed to reply to malformed frame");
                            return ExitReason::Disconnected;
                        }
                        continue;
                    }
                    Ok(RecvOutcome::Oversize(len)) => {
                        warn!(peer = %terminal_id, len, max_message_bytes, "oversize frame from peer, closing connection");
                        let reason = format!("frame of {len} bytes exceeds the {max_message_bytes} byte cap");
                        let _ = send_frame(&mut ws, &PeerFrame::Reply(PeerReply::Error { reason })).await;
                        return ExitReason::Disconnected;
                    }
                    Err(e) => {
                        warn!(peer = %terminal_id, error = %e, "peer connection read error");
                        return ExitReason::Disconnected;
                    }
                };
                match frame {
                    PeerFrame::Reply(PeerReply::Ack { message_id }) => {
                        pending_acks.remove(&message_id);
                        if let Err(e) = pos_bus::mark_sent(pool, &message_id, AckStage::Peer).await {
                            warn!(error = %e, "mark_sent(peer_ack) failed");
                        }
                    }
                    PeerFrame::Reply(PeerReply::Error { reason }) => {
                        warn!(%reason, "peer reported an apply error");
                    }
                    PeerFrame::Reconcile(ReconcileFrame::InventoryResponse { request_id, inventory, generated_at }) => {
                        if let Some((expected, reply)) = pending_reconcile.take() {
                            if expected == request_id {
                                let _ = reply.send(Ok(InventorySnapshot { generated_at, rows: inventory }));
                            } else {
                                warn!(%request_id, %expected, "reconcile response id mismatch, dropping");
                            }
                        }
                    }
                    PeerFrame::Envelope(_) | PeerFrame::Reconcile(ReconcileFrame::InventoryRequest { .. }) => {
                        // A connection we initiated only pushes envelopes and
                        // reconcile requests; it never applies them.
                    }
                }
            }

            _ = drain_tick.tick() => {
                if let Err(e) = drain_once(&mut ws, pool, terminal_id, backoff_base_ms, &mut pending_acks).await {
                    warn!(error = %e, "drain tick failed, dropping connection");
                    return ExitReason::Disconnected;
                }
            }

            _ = ack_tick.tick() => {
                if let Err(e) = check_ack_timeouts(pool, max_retries, &mut pending_acks).await {
                    warn!(error = %e, "ack-timeout bookkeeping failed");
                }
            }

            cmd = commands.recv() => {
                match cmd {
                    Some(Command::RequestInventorySnapshot { reply }) => {
                        if pending_reconcile.is_some() {
                            let _ = reply.send(Err(anyhow::anyhow!("a reconcile request is already in flight")));
                        } else {
                            let request_id = pos_schemas::new_ulid();
                            let frame = PeerFrame::Reconcile(ReconcileFrame::InventoryRequest {
                                request_id: request_id.clone(),
                            });
                            match send_frame(&mut ws, &frame).await {
                                Ok(()) => pending_reconcile = Some((request_id, reply)),
                                Err(e) => { let _ = reply.send(Err(e)); }
                            }
                        }
                    }
                    None => return ExitReason::ShuttingDown,
                }
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return ExitReason::ShuttingDown;
                }
            }
        }
    }
}

async fn drain_once(
    ws: &mut ClientWs,
    pool: &SqlitePool,
    terminal_id: &str,
    backoff_base_ms: u64,
    pending_acks: &mut HashMap<String, Instant>,
) -> Result<()> {
    let rows = pos_bus::get_pending(pool, "pending", DRAIN_BATCH_LIMIT).await?;
    for row in rows {
        if pending_acks.contains_key(&row.id) {
            continue;
        }
        let envelope = PeerEnvelope {
            id: row.id.clone(),
            from_terminal: terminal_id.to_string(),
            topic: row.topic.clone(),
            payload: row.payload.clone(),
            timestamp: row.created_at,
        };
        match send_frame(ws, &PeerFrame::Envelope(envelope)).await {
            Ok(()) => {
                let deadline =
                    Instant::now() + backoff_delay(backoff_base_ms, row.retry_count as u32);
                pending_acks.insert(row.id, deadline);
            }
            Err(e) => {
                // A send failure is treated exactly like an ACK timeout (§4.3).
                pos_bus::increment_retries(pool, &row.id).await.ok();
                return Err(e);
            }
        }
    }
    Ok(())
}

async fn check_ack_timeouts(
    pool: &SqlitePool,
    max_retries: u32,
    pending_acks: &mut HashMap<String, Instant>,
) -> Result<()> {
    let now = Instant::now();
    let expired: Vec<String> = pending_acks
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(id, _)| id.clone())
        .collect();

    for id in expired {
        pending_acks.remove(&id);
        let retries = pos_bus::increment_retries(pool, &id).await?;
        if retries as u32 >= max_retries {
            pos_bus::mark_error(pool, &id).await?;
        }
    }
    Ok(())
}
