//! Scenario S2 — Replay on reconnect (§8).
//!
//! `L2` is unreachable while `L1` completes 3 sales. Once delivery resumes,
//! all 3 rows become `peer_ack` on `L1` and `L2.transactions` contains all 3
//! — draining never skips a row just because an earlier attempt found no
//! live connection.

use pos_db::AckStage;
use pos_schemas::TopicPayload;
use pos_testkit::{envelope_for, sample_sale, seeded_pool};

#[tokio::test]
async fn all_three_sales_replay_once_l2_comes_back() {
    let l1 = pos_testkit::seeded_pool("p1", 100).await.unwrap();
    let l2 = pos_testkit::seeded_pool("p1", 100).await.unwrap();

    let mut outbox_ids = Vec::new();
    let mut sales = Vec::new();
    for _ in 0..3 {
        let sale = sample_sale("L1", "p1", 1, 1000, 80);
        let mut tx = l1.begin().await.unwrap();
        pos_db::transaction_insert(&mut tx, &sale).await.unwrap();
        let id = pos_bus::publish(&mut tx, &TopicPayload::TransactionNew(Box::new(sale.clone())))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        outbox_ids.push(id);
        sales.push(sale);
    }

    // L2 was unreachable the whole time: nothing has been delivered yet.
    let pending = pos_bus::get_pending(&l1, "pending", 10).await.unwrap();
    assert_eq!(pending.len(), 3);

    // Connectivity resumes: drain all three rows in ULID order.
    for row in &pending {
        let envelope = envelope_for(&row.decode_payload().unwrap(), "L1");
        assert!(pos_peer::apply_envelope(&l2, &envelope).await.unwrap());
        pos_bus::mark_sent(&l1, &row.id, AckStage::Peer).await.unwrap();
    }

    for sale in &sales {
        assert!(pos_db::transaction_exists(&l2, &sale.id).await.unwrap());
    }
    for id in &outbox_ids {
        assert_eq!(
            pos_db::get_by_status(&l1, "peer_ack", 10)
                .await
                .unwrap()
                .iter()
                .filter(|r| &r.id == id)
                .count(),
            1
        );
    }
    assert!(pos_bus::get_pending(&l1, "pending", 10).await.unwrap().is_empty());
}
