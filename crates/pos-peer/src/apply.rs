//! Idempotent application of an inbound envelope's effect (§4.3).
//!
//! Shared by the server side (applying what peers push to us) — the client
//! side only ever sends, it never applies inbound business effects over the
//! connection it initiated.

use anyhow::{Context, Result};
use pos_schemas::envelope::PeerEnvelope;
use pos_schemas::TopicPayload;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

/// Record `envelope.id` in `inbox_processed` and, if it hasn't been seen
/// before, apply its effect. Returns `true` if the effect was applied,
/// `false` if this was a benign duplicate.
pub async fn apply_envelope(pool: &SqlitePool, envelope: &PeerEnvelope) -> Result<bool> {
    let mut tx = pool.begin().await.context("apply_envelope: begin failed")?;

    let fresh = pos_db::inbox_insert_deduped(
        &mut *tx,
        &envelope.id,
        &envelope.from_terminal,
        &envelope.topic,
        &envelope.payload,
    )
    .await?;

    if !fresh {
        tx.commit().await.context("apply_envelope: commit (duplicate) failed")?;
        return Ok(false);
    }

    let payload = TopicPayload::from_topic_and_json(&envelope.topic, &envelope.payload)
        .with_context(|| format!("decoding payload for topic {}", envelope.topic))?;

    apply_effect(&mut tx, &envelope.from_terminal, &payload).await?;

    tx.commit().await.context("apply_envelope: commit failed")?;
    info!(message_id = %envelope.id, topic = %envelope.topic, from = %envelope.from_terminal, "applied inbound envelope");
    Ok(true)
}

async fn apply_effect(
    tx: &mut Transaction<'_, Sqlite>,
    from_terminal: &str,
    payload: &TopicPayload,
) -> Result<()> {
    use pos_schemas::envelope::TopicPayload::*;

    match payload {
        TransactionNew(txn) => {
            pos_db::transaction_insert(tx, txn).await?;
            for item in &txn.items {
                let resulting =
                    pos_db::inventory_apply_delta(tx, &item.product_id, -item.quantity).await?;
                pos_db::inventory_change_insert(
                    &mut **tx,
                    &item.product_id,
                    "sale",
                    -item.quantity,
                    resulting,
                    from_terminal,
                    None,
                    Some(&txn.id),
                    Some(&item.id),
                )
                .await?;
            }
        }
        InventoryUpdate(update) => {
            let resulting =
                pos_db::inventory_apply_delta(tx, &update.product_id, update.delta).await?;
            pos_db::inventory_change_insert(
                &mut **tx,
                &update.product_id,
                "adjustment",
                update.delta,
                resulting,
                from_terminal,
                None,
                None,
                None,
            )
            .await?;
        }
        InventoryChecksum(_) => {
            // Informational only. The reconciliation sub-protocol, not
            // replicated outbox traffic, is what actually compares and
            // resolves a divergence (see pos-reconcile).
        }
        EmployeeUpsert(employee) => {
            pos_db::employee_upsert(&mut **tx, employee).await?;
        }
        ProductUpsert(upsert) => {
            pos_db::product_upsert(&mut **tx, &upsert.product).await?;
            if let Some(inv) = &upsert.inventory {
                pos_db::inventory_overwrite(
                    &mut **tx,
                    &upsert.product.id,
                    inv.current_stock,
                    inv.reserved_stock,
                    chrono::Utc::now(),
                )
                .await?;
            }
        }
        DiscountRuleUpsert(rule) => {
            pos_db::discount_rule_upsert(&mut **tx, &rule.id, &rule.rule).await?;
        }
        PosConfigUpdate(update) => {
            pos_db::pos_config_upsert(&mut **tx, &update.key, &update.value).await?;
        }
    }
    Ok(())
}
