//! C6 Reconciler (§4.6): periodic checksum exchange and last-writer-wins
//! inventory repair, closing windows left by message loss or prolonged
//! partition. The normal `inventory:update` flow is the primary consistency
//! mechanism; this is advisory cleanup.
//!
//! The diff/compare/gate logic (this module's core) is pure and
//! deterministic — no IO, no clock reads beyond comparing supplied
//! timestamps — so it is unit-testable without a store or network.

use anyhow::Result;
use chrono::{DateTime, Utc};
use pos_db::InventoryRow;
use pos_peer::{InventorySnapshot, PeerClient};
use pos_schemas::envelope::{InventoryChecksumPayload, InventorySnapshotRow};
use pos_schemas::TopicPayload;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{info, warn};

/// §4.6 step 1: `(productId, currentStock, reservedStock)` concatenated in
/// ascending product id order and digested with SHA-256.
pub fn compute_checksum(rows: &[InventoryRow]) -> (String, i64) {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(row.product_id.as_bytes());
        hasher.update(b"|");
        hasher.update(row.current_stock.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(row.reserved_stock.to_string().as_bytes());
        hasher.update(b"\n");
    }
    (hex::encode(hasher.finalize()), rows.len() as i64)
}

fn checksum_of_snapshot(rows: &[InventorySnapshotRow]) -> String {
    let mut sorted: Vec<&InventorySnapshotRow> = rows.iter().collect();
    sorted.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    let mut hasher = Sha256::new();
    for row in sorted {
        hasher.update(row.product_id.as_bytes());
        hasher.update(b"|");
        hasher.update(row.current_stock.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(row.reserved_stock.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// A single §4.6 step-4 outcome for one product id.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    /// Only the remote side had this product; insert its row locally.
    InsertRemote {
        product_id: String,
        current_stock: i64,
        reserved_stock: i64,
        last_updated: DateTime<Utc>,
    },
    /// Both sides had it, stock differed, and the remote row won; overwrite
    /// the local row to match.
    AdoptRemote {
        product_id: String,
        current_stock: i64,
        reserved_stock: i64,
        last_updated: DateTime<Utc>,
        local_stock: i64,
    },
    /// Both sides had it, stock differed, and the divergence exceeds the
    /// configured threshold — too large to silently overwrite.
    DivergenceAlert {
        product_id: String,
        local_stock: i64,
        remote_stock: i64,
        delta: i64,
    },
}

/// Computes the §4.6 step-4 row-wise diff between `local` and a peer's
/// `remote` snapshot. Pure function: no IO, deterministic given its inputs.
pub fn diff(
    local: &[InventoryRow],
    remote: &[InventorySnapshotRow],
    local_terminal: &str,
    remote_terminal: &str,
    divergence_threshold: i64,
) -> Vec<ReconcileAction> {
    let local_by_id: BTreeMap<&str, &InventoryRow> =
        local.iter().map(|r| (r.product_id.as_str(), r)).collect();
    let remote_by_id: BTreeMap<&str, &InventorySnapshotRow> =
        remote.iter().map(|r| (r.product_id.as_str(), r)).collect();

    let mut product_ids: Vec<&str> = local_by_id
        .keys()
        .chain(remote_by_id.keys())
        .copied()
        .collect();
    product_ids.sort_unstable();
    product_ids.dedup();

    let mut actions = Vec::new();
    for product_id in product_ids {
        match (local_by_id.get(product_id), remote_by_id.get(product_id)) {
            (Some(_), None) => {
                // Only local exists: no change (§4.6 step 4).
            }
            (None, Some(r)) => {
                actions.push(ReconcileAction::InsertRemote {
                    product_id: product_id.to_string(),
                    current_stock: r.current_stock,
                    reserved_stock: r.reserved_stock,
                    last_updated: r.last_updated,
                });
            }
            (Some(l), Some(r)) => {
                if l.current_stock == r.current_stock && l.reserved_stock == r.reserved_stock {
                    continue;
                }
                let remote_wins = match r.last_updated.cmp(&l.last_updated) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => remote_terminal > local_terminal,
                };
                if !remote_wins {
                    // Local is already the winning copy; nothing to do here.
                    // The remote terminal's own reconcile pass will adopt ours.
                    continue;
                }
                let delta = r.current_stock - l.current_stock;
                if delta.abs() > divergence_threshold {
                    actions.push(ReconcileAction::DivergenceAlert {
                        product_id: product_id.to_string(),
                        local_stock: l.current_stock,
                        remote_stock: r.current_stock,
                        delta,
                    });
                } else {
                    actions.push(ReconcileAction::AdoptRemote {
                        product_id: product_id.to_string(),
                        current_stock: r.current_stock,
                        reserved_stock: r.reserved_stock,
                        last_updated: r.last_updated,
                        local_stock: l.current_stock,
                    });
                }
            }
            (None, None) => unreachable!("product id came from one of the two maps"),
        }
    }
    actions
}

/// Applies `actions` to the store: `InsertRemote`/`AdoptRemote` overwrite the
/// local row and record an audit `inventory_changes` entry; `DivergenceAlert`
/// writes nothing and only logs.
async fn apply_actions(
    pool: &SqlitePool,
    local_terminal: &str,
    actions: &[ReconcileAction],
) -> Result<()> {
    for action in actions {
        match action {
            ReconcileAction::InsertRemote {
                product_id,
                current_stock,
                reserved_stock,
                last_updated,
            } => {
                let mut tx = pool.begin().await?;
                pos_db::inventory_overwrite(
                    &mut tx,
                    product_id,
                    *current_stock,
                    *reserved_stock,
                    *last_updated,
                )
                .await?;
                pos_db::inventory_change_insert(
                    &mut tx,
                    product_id,
                    "adjustment",
                    *current_stock,
                    *current_stock,
                    local_terminal,
                    None,
                    None,
                    None,
                )
                .await?;
                tx.commit().await?;
                info!(
                    %product_id,
                    current_stock, reserved_stock, "inventory.reconciled: inserted remote row"
                );
            }
            ReconcileAction::AdoptRemote {
                product_id,
                current_stock,
                reserved_stock,
                last_updated,
                local_stock,
            } => {
                let mut tx = pool.begin().await?;
                pos_db::inventory_overwrite(
                    &mut tx,
                    product_id,
                    *current_stock,
                    *reserved_stock,
                    *last_updated,
                )
                .await?;
                pos_db::inventory_change_insert(
                    &mut tx,
                    product_id,
                    "adjustment",
                    current_stock - local_stock,
                    *current_stock,
                    local_terminal,
                    None,
                    None,
                    None,
                )
                .await?;
                tx.commit().await?;
                info!(
                    %product_id,
                    local_stock, current_stock, "inventory.reconciled: adopted remote row"
                );
            }
            ReconcileAction::DivergenceAlert {
                product_id,
                local_stock,
                remote_stock,
                delta,
            } => {
                warn!(
                    %product_id,
                    local_stock,
                    remote_stock,
                    delta,
                    "inventory.reconciled: divergence exceeds threshold, not auto-resolving"
                );
            }
        }
    }
    Ok(())
}

/// The periodic reconciliation task (§4.6). One instance per terminal.
pub struct Reconciler {
    pool: SqlitePool,
    terminal_id: String,
    divergence_threshold: i64,
    interval: Duration,
    watermarks: HashMap<String, DateTime<Utc>>,
}

impl Reconciler {
    pub fn new(
        pool: SqlitePool,
        terminal_id: String,
        divergence_threshold: i64,
        interval_secs: u64,
    ) -> Self {
        Reconciler {
            pool,
            terminal_id,
            divergence_threshold,
            interval: Duration::from_secs(interval_secs.max(1)),
            watermarks: HashMap::new(),
        }
    }

    /// Runs the checksum/diff/repair cycle once, on-demand or on a timer.
    pub async fn tick_once(&mut self, peer_client: &PeerClient) -> Result<()> {
        let local_rows = pos_db::inventory_list_all(&self.pool).await?;
        let (checksum, row_count) = compute_checksum(&local_rows);
        let generated_at = Utc::now();

        pos_bus::publish(
            &self.pool,
            &TopicPayload::InventoryChecksum(InventoryChecksumPayload {
                checksum: checksum.clone(),
                row_count,
                generated_at,
            }),
        )
        .await?;

        let peer_urls: Vec<String> = peer_client.peer_urls().map(str::to_string).collect();
        for peer_url in peer_urls {
            let snapshot = match peer_client.request_inventory_snapshot(&peer_url).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(peer = %peer_url, error = %e, "could not fetch peer inventory snapshot");
                    continue;
                }
            };

            if !self.accept_watermark(&peer_url, snapshot.generated_at) {
                warn!(peer = %peer_url, "rejected stale inventory snapshot (monotonicity watermark)");
                continue;
            }

            let remote_checksum = checksum_of_snapshot(&snapshot.rows);
            if remote_checksum == checksum {
                continue;
            }

            let actions = diff(
                &local_rows,
                &snapshot.rows,
                &self.terminal_id,
                &peer_url,
                self.divergence_threshold,
            );
            if let Err(e) = apply_actions(&self.pool, &self.terminal_id, &actions).await {
                warn!(peer = %peer_url, error = %e, "failed to apply reconciliation actions");
            }
        }
        Ok(())
    }

    /// Rejects a snapshot whose `generated_at` regresses relative to the
    /// last one accepted from this peer, so a stale/duplicate response can
    /// never undo a more recent reconciliation.
    fn accept_watermark(&mut self, peer: &str, generated_at: DateTime<Utc>) -> bool {
        match self.watermarks.get(peer) {
            Some(last) if generated_at <= *last => false,
            _ => {
                self.watermarks.insert(peer.to_string(), generated_at);
                true
            }
        }
    }

    /// Runs `tick_once` on `interval` until `shutdown` fires.
    pub async fn run(&mut self, peer_client: &PeerClient, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.tick_once(peer_client).await {
                        warn!(error = %e, "reconcile tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn inv_row(id: &str, stock: i64, reserved: i64) -> InventoryRow {
        InventoryRow {
            product_id: id.to_string(),
            current_stock: stock,
            reserved_stock: reserved,
            last_updated: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            last_synced: None,
        }
    }

    fn snap_row(id: &str, stock: i64, reserved: i64, ts: DateTime<Utc>) -> InventorySnapshotRow {
        InventorySnapshotRow {
            product_id: id.to_string(),
            current_stock: stock,
            reserved_stock: reserved,
            last_updated: ts,
        }
    }

    #[test]
    fn checksum_is_order_independent_of_input_order_but_depends_on_content() {
        let a = vec![inv_row("p1", 5, 0), inv_row("p2", 3, 0)];
        let b = vec![inv_row("p1", 5, 0), inv_row("p2", 4, 0)];
        let (checksum_a, count_a) = compute_checksum(&a);
        let (checksum_b, count_b) = compute_checksum(&b);
        assert_eq!(count_a, count_b);
        assert_ne!(checksum_a, checksum_b);
    }

    #[test]
    fn only_remote_has_the_product_inserts_it() {
        let local = vec![];
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let remote = vec![snap_row("p1", 7, 0, ts)];
        let actions = diff(&local, &remote, "L1", "L2", 10);
        assert_eq!(
            actions,
            vec![ReconcileAction::InsertRemote {
                product_id: "p1".into(),
                current_stock: 7,
                reserved_stock: 0,
                last_updated: ts,
            }]
        );
    }

    #[test]
    fn only_local_has_the_product_is_left_untouched() {
        let local = vec![inv_row("p1", 7, 0)];
        let remote = vec![];
        let actions = diff(&local, &remote, "L1", "L2", 10);
        assert!(actions.is_empty());
    }

    #[test]
    fn newer_remote_timestamp_wins_within_threshold() {
        let older = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let local = vec![InventoryRow {
            last_updated: older,
            ..inv_row("p1", 10, 0)
        }];
        let remote = vec![snap_row("p1", 14, 0, newer)];
        let actions = diff(&local, &remote, "L1", "L2", 10);
        assert_eq!(
            actions,
            vec![ReconcileAction::AdoptRemote {
                product_id: "p1".into(),
                current_stock: 14,
                reserved_stock: 0,
                last_updated: newer,
                local_stock: 10,
            }]
        );
    }

    #[test]
    fn older_remote_timestamp_loses_and_is_left_untouched() {
        let older = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let local = vec![InventoryRow {
            last_updated: newer,
            ..inv_row("p1", 10, 0)
        }];
        let remote = vec![snap_row("p1", 2, 0, older)];
        let actions = diff(&local, &remote, "L1", "L2", 10);
        assert!(actions.is_empty());
    }

    #[test]
    fn equal_timestamp_tie_breaks_on_lexicographically_greater_terminal_id() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let local = vec![InventoryRow {
            last_updated: ts,
            ..inv_row("p1", 10, 0)
        }];
        let remote = vec![snap_row("p1", 20, 0, ts)];

        let actions_a = diff(&local, &remote, "A", "B", 100);
        assert_eq!(actions_a.len(), 1);
        assert!(matches!(actions_a[0], ReconcileAction::AdoptRemote { .. }));

        let actions_b = diff(&local, &remote, "B", "A", 100);
        assert!(actions_b.is_empty());
    }

    #[test]
    fn divergence_beyond_threshold_raises_an_alert_instead_of_overwriting() {
        let older = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let local = vec![InventoryRow {
            last_updated: older,
            ..inv_row("p1", 40, 0)
        }];
        let remote = vec![snap_row("p1", 25, 0, newer)];
        let actions = diff(&local, &remote, "L1", "L2", 10);
        assert_eq!(
            actions,
            vec![ReconcileAction::DivergenceAlert {
                product_id: "p1".into(),
                local_stock: 40,
                remote_stock: 25,
                delta: -15,
            }]
        );
    }

    #[test]
    fn watermark_rejects_a_snapshot_whose_generated_at_regresses() {
        let pool_fut = pos_db::connect_in_memory();
        let pool = tokio_test_block_on(pool_fut);
        let mut reconciler = Reconciler::new(pool, "L1".into(), 10, 600);
        let first = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(reconciler.accept_watermark("L2", first));
        assert!(!reconciler.accept_watermark("L2", earlier));
        assert!(!reconciler.accept_watermark("L2", first));
    }

    fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
