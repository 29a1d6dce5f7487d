//! C3 PeerServer (§4.3): accepts inbound peer connections, applies envelopes
//! idempotently and ACKs them, and answers the reconciliation sub-protocol's
//! inventory snapshot requests.

use crate::apply::apply_envelope;
use crate::connection::{recv_frame, send_frame, RecvOutcome};
use anyhow::{Context, Result};
use pos_schemas::envelope::{PeerFrame, PeerReply, ReconcileFrame};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{info, warn};

pub struct PeerServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    pool: SqlitePool,
    max_message_bytes: usize,
}

impl PeerServer {
    /// Binds `preferred_port`, falling back to `preferred_port + 1` exactly
    /// once if the first is already taken (§7 startup sequencing).
    pub async fn bind(pool: SqlitePool, preferred_port: u16, max_message_bytes: usize) -> Result<Self> {
        let primary: SocketAddr = ([0, 0, 0, 0], preferred_port).into();
        let listener = match TcpListener::bind(primary).await {
            Ok(l) => l,
            Err(primary_err) => {
                let fallback: SocketAddr = ([0, 0, 0, 0], preferred_port + 1).into();
                warn!(port = preferred_port, fallback_port = preferred_port + 1, error = %primary_err, "peer server port busy, retrying on fallback port");
                TcpListener::bind(fallback)
                    .await
                    .with_context(|| format!("failed to bind {primary} or fallback {fallback}"))?
            }
        };
        let local_addr = listener.local_addr().context("reading bound address")?;
        Ok(PeerServer { listener, local_addr, pool, max_message_bytes })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the accept loop until `shutdown` is signaled. Each accepted
    /// connection is handled by its own task.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(addr = %self.local_addr, "peer server listening");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let pool = self.pool.clone();
                            let max_message_bytes = self.max_message_bytes;
                            let mut conn_shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, pool, max_message_bytes, &mut conn_shutdown).await {
                                    warn!(%peer_addr, error = %e, "peer connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("peer server shutting down");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    pool: SqlitePool,
    max_message_bytes: usize,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("websocket handshake failed")?;

    loop {
        tokio::select! {
            frame = recv_frame(&mut ws, max_message_bytes) => {
                match frame? {
                    RecvOutcome::Closed => return Ok(()),
                    RecvOutcome::Malformed(reason) => {
                        warn!(%reason, "malformed peer frame, replying with an error and continuing");
                        send_frame(&mut ws, &PeerFrame::Reply(PeerReply::Error { reason })).await?;
                    }
                    RecvOutcome::Oversize(len) => {
                        warn!(len, max_message_bytes, "oversize peer frame, closing connection");
                        let reason = format!("frame of {len} bytes exceeds the {max_message_bytes} byte cap");
                        send_frame(&mut ws, &PeerFrame::Reply(PeerReply::Error { reason })).await?;
                        return Ok(());
                    }
                    RecvOutcome::Frame(PeerFrame::Envelope(envelope)) => {
                        let reply = match apply_envelope(&pool, &envelope).await {
                            Ok(_) => PeerReply::Ack { message_id: envelope.id.clone() },
                            Err(e) => {
                                warn!(message_id = %envelope.id, error = %e, "failed to apply inbound envelope");
                                PeerReply::Error { reason: e.to_string() }
                            }
                        };
                        send_frame(&mut ws, &PeerFrame::Reply(reply)).await?;
                    }
                    RecvOutcome::Frame(PeerFrame::Reconcile(ReconcileFrame::InventoryRequest { request_id })) => {
                        let rows = pos_db::inventory_list_all(&pool).await?;
                        let inventory = rows
                            .into_iter()
                            .map(|r| pos_schemas::envelope::InventorySnapshotRow {
                                product_id: r.product_id,
                                current_stock: r.current_stock,
                                reserved_stock: r.reserved_stock,
                                last_updated: r.last_updated,
                            })
                            .collect();
                        let response = ReconcileFrame::InventoryResponse {
                            request_id,
                            inventory,
                            generated_at: chrono::Utc::now(),
                        };
                        send_frame(&mut ws, &PeerFrame::Reconcile(response)).await?;
                    }
                    RecvOutcome::Frame(PeerFrame::Reply(_))
                    | RecvOutcome::Frame(PeerFrame::Reconcile(ReconcileFrame::InventoryResponse { .. })) => {
                        // Not meaningful on a connection we accepted; a
                        // well-behaved peer never sends these here.
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}
