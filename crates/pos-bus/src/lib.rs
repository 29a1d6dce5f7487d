//! C2 MessageBus (§4.2): the durable-publish API business collaborators use
//! to append outbox rows, and the ack/retry API C4/C5 use to drive rows
//! through `pending → peer_ack → cloud_ack`.
//!
//! This is a thin facade over `pos_db`'s outbox operations. It exists as its
//! own component (rather than folding into `pos-db`) so that C4/C5 depend on
//! a narrow publish/ack surface instead of the whole store.

use anyhow::Result;
use pos_db::AckStage;
use pos_schemas::TopicPayload;
use sqlx::{Executor, Sqlite};
use tracing::{info, warn};

pub use pos_db::OutboxRow;

/// `publish(topic, payload) → id`. Caller is responsible for opening (and
/// committing or rolling back) the enclosing transaction — this call never
/// commits on its own.
pub async fn publish<'e, E>(exec: E, payload: &TopicPayload) -> Result<String>
where
    E: Executor<'e, Database = Sqlite>,
{
    let topic = payload.topic();
    let id = pos_db::publish(exec, payload).await?;
    info!(outbox_id = %id, %topic, "outbox row published");
    Ok(id)
}

/// `markSent(id, stage)` — `pending → peer_ack` or `peer_ack → cloud_ack`.
pub async fn mark_sent(pool: &sqlx::SqlitePool, id: &str, stage: AckStage) -> Result<bool> {
    let ok = pos_db::mark_sent(pool, id, stage).await?;
    if ok {
        info!(outbox_id = %id, "outbox row acked");
    }
    Ok(ok)
}

/// `markError(id)` — dead-letters the row.
pub async fn mark_error(pool: &sqlx::SqlitePool, id: &str) -> Result<bool> {
    let ok = pos_db::mark_error(pool, id).await?;
    if ok {
        warn!(outbox_id = %id, "outbox row dead-lettered");
    }
    Ok(ok)
}

pub async fn increment_retries(pool: &sqlx::SqlitePool, id: &str) -> Result<i64> {
    pos_db::increment_retries(pool, id).await
}

/// `getPending(status, limit)` — oldest-first rows at `status`.
pub async fn get_pending(
    pool: &sqlx::SqlitePool,
    status: &str,
    limit: i64,
) -> Result<Vec<OutboxRow>> {
    pos_db::get_by_status(pool, status, limit).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pos_schemas::envelope::InventoryUpdatePayload;

    #[tokio::test]
    async fn publish_then_mark_sent_advances_status() {
        let pool = pos_db::connect_in_memory().await.unwrap();
        let id = publish(
            &pool,
            &TopicPayload::InventoryUpdate(InventoryUpdatePayload {
                product_id: "p1".into(),
                delta: -1,
            }),
        )
        .await
        .unwrap();

        let pending = get_pending(&pool, "pending", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);

        mark_sent(&pool, &id, AckStage::Peer).await.unwrap();
        let peer_acked = get_pending(&pool, "peer_ack", 10).await.unwrap();
        assert_eq!(peer_acked.len(), 1);
    }

    #[tokio::test]
    async fn mark_error_dead_letters_a_row() {
        let pool = pos_db::connect_in_memory().await.unwrap();
        let id = publish(
            &pool,
            &TopicPayload::InventoryUpdate(InventoryUpdatePayload {
                product_id: "p1".into(),
                delta: -1,
            }),
        )
        .await
        .unwrap();
        mark_error(&pool, &id).await.unwrap();
        assert!(get_pending(&pool, "pending", 10).await.unwrap().is_empty());
        assert_eq!(get_pending(&pool, "error", 10).await.unwrap().len(), 1);
    }
}
