//! Scenario S3 — Duplicate delivery (§8).
//!
//! `L1` sends the same envelope twice for row *r* (e.g. a missed ACK forces
//! a resend). `L2.inbox_processed` must end up with exactly one entry for
//! *r*.id, `L2.transactions` exactly one row for the transaction, and
//! `L1`'s row still reaches `peer_ack`.

use pos_db::AckStage;
use pos_schemas::TopicPayload;
use pos_testkit::{envelope_for, sample_sale, seeded_pool};

#[tokio::test]
async fn resend_after_a_missed_ack_applies_exactly_once() {
    let l1 = pos_testkit::seeded_pool("p1", 100).await.unwrap();
    let l2 = pos_testkit::seeded_pool("p1", 100).await.unwrap();

    let sale = sample_sale("L1", "p1", 1, 1000, 80);
    let mut tx = l1.begin().await.unwrap();
    pos_db::transaction_insert(&mut tx, &sale).await.unwrap();
    let outbox_id = pos_bus::publish(&mut tx, &TopicPayload::TransactionNew(Box::new(sale.clone())))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let row = pos_bus::get_pending(&l1, "pending", 1).await.unwrap().remove(0);
    let envelope = envelope_for(&row.decode_payload().unwrap(), "L1");

    // First delivery: L2 applies it but the ACK is lost in transit, so L1
    // never calls mark_sent and resends the identical envelope (same id).
    assert!(pos_peer::apply_envelope(&l2, &envelope).await.unwrap());
    assert!(!pos_peer::apply_envelope(&l2, &envelope).await.unwrap());

    let before = pos_db::inventory_get(&l2, "p1").await.unwrap().unwrap();
    assert_eq!(before.current_stock, 99, "the sale's inventory delta must not double-apply");

    let dupes = sqlx::query_scalar::<_, i64>("select count(*) from inbox_processed where message_id = ?1")
        .bind(&envelope.id)
        .fetch_one(&l2)
        .await
        .unwrap();
    assert_eq!(dupes, 1);

    let txn_rows = sqlx::query_scalar::<_, i64>("select count(*) from transactions where id = ?1")
        .bind(&sale.id)
        .fetch_one(&l2)
        .await
        .unwrap();
    assert_eq!(txn_rows, 1);

    // The resend eventually gets a real ACK back.
    pos_bus::mark_sent(&l1, &outbox_id, AckStage::Peer).await.unwrap();
    let acked = pos_bus::get_pending(&l1, "peer_ack", 10).await.unwrap();
    assert_eq!(acked.len(), 1);
}
