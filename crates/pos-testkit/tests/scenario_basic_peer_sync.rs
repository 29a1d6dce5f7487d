//! Scenario S1 — Basic peer sync (§8).
//!
//! `L1` completes a sale (1 item, qty 2, unit price 10.00, tax 1.60, total
//! 21.60), publishing outbox row *r*. Delivering that row's envelope to `L2`
//! and acking it back on `L1` must leave `L2.inbox_processed` containing
//! *r*.id and `L1.outbox[r].status = peer_ack`.

use pos_db::AckStage;
use pos_schemas::TopicPayload;
use pos_testkit::{envelope_for, sample_sale, seeded_pool};

#[tokio::test]
async fn l2_applies_the_sale_and_l1_s_row_reaches_peer_ack() {
    let l1 = pos_testkit::seeded_pool("p1", 100).await.unwrap();
    let l2 = pos_testkit::seeded_pool("p1", 100).await.unwrap();

    let sale = sample_sale("L1", "p1", 2, 1000, 160);
    assert_eq!(sale.total_cents.0, 2160);

    let mut tx = l1.begin().await.unwrap();
    pos_db::transaction_insert(&mut tx, &sale).await.unwrap();
    let outbox_id = pos_bus::publish(&mut tx, &TopicPayload::TransactionNew(Box::new(sale.clone())))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let row = pos_bus::get_pending(&l1, "pending", 10).await.unwrap();
    assert_eq!(row.len(), 1);
    assert_eq!(row[0].id, outbox_id);

    let envelope = envelope_for(&row[0].decode_payload().unwrap(), "L1");
    let applied = pos_peer::apply_envelope(&l2, &envelope).await.unwrap();
    assert!(applied);
    assert!(pos_db::inbox_contains(&l2, &envelope.id).await.unwrap());
    assert!(pos_db::transaction_exists(&l2, &sale.id).await.unwrap());

    pos_bus::mark_sent(&l1, &outbox_id, AckStage::Peer).await.unwrap();
    let still_pending = pos_bus::get_pending(&l1, "pending", 10).await.unwrap();
    assert!(still_pending.is_empty());
    let acked = pos_bus::get_pending(&l1, "peer_ack", 10).await.unwrap();
    assert_eq!(acked.len(), 1);
    assert_eq!(acked[0].id, outbox_id);
}
