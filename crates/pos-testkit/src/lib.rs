//! Fixture builders shared by the scenario tests under `tests/`.
//!
//! Kept deliberately small: a seeded in-memory store plus the handful of
//! sample domain values the scenarios in §8 need. No network, no fakes —
//! every scenario drives the real `pos-db`/`pos-bus`/`pos-peer`/`pos-reconcile`
//! functions directly.

use anyhow::Result;
use chrono::Utc;
use pos_schemas::envelope::PeerEnvelope;
use pos_schemas::{
    Cents, Employee, EmployeeCapabilities, Product, ProductCategory, ProductSize, Transaction,
    TransactionItem, TransactionStatus, SyncStatus, TopicPayload,
};
use sqlx::SqlitePool;

pub const EMPLOYEE_ID: &str = "emp-1";

pub fn sample_employee() -> Employee {
    Employee {
        id: EMPLOYEE_ID.to_string(),
        code: "0001".to_string(),
        first_name: "Jordan".to_string(),
        last_name: "Lee".to_string(),
        pin_hash: "$argon2id$unused-in-tests$".to_string(),
        active: true,
        capabilities: EmployeeCapabilities::empty(),
    }
}

pub fn sample_product(product_id: &str) -> Product {
    let now = Utc::now();
    Product {
        id: product_id.to_string(),
        sku: format!("SKU-{product_id}"),
        name: "Test Bottle".to_string(),
        category: ProductCategory::Wine,
        size: ProductSize::Ml750,
        cost_cents: Cents(500),
        retail_price_cents: Cents(1000),
        parent_product_id: None,
        units_per_parent: None,
        loyalty_multiplier: 1.0,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

/// A one-line, one-payment sale: `quantity` units of `product_id` at
/// `unit_price_cents`, with `tax_cents` tax and no discount.
pub fn sample_sale(
    terminal_id: &str,
    product_id: &str,
    quantity: i64,
    unit_price_cents: i64,
    tax_cents: i64,
) -> Transaction {
    let subtotal = unit_price_cents * quantity;
    let total = subtotal + tax_cents;
    let txn_id = pos_schemas::new_ulid();
    let item = TransactionItem {
        id: pos_schemas::new_ulid(),
        transaction_id: txn_id.clone(),
        product_id: product_id.to_string(),
        quantity,
        unit_price_cents: Cents(unit_price_cents),
        discount_cents: Cents::ZERO,
        total_price_cents: Cents(subtotal),
        discount_reason: None,
        returned: false,
    };
    Transaction {
        id: txn_id,
        transaction_number: pos_schemas::new_ulid(),
        employee_id: EMPLOYEE_ID.to_string(),
        customer_id: None,
        subtotal_cents: Cents(subtotal),
        tax_cents: Cents(tax_cents),
        discount_cents: Cents::ZERO,
        total_cents: Cents(total),
        points_earned: 0,
        points_redeemed: 0,
        status: TransactionStatus::Completed,
        sales_channel: "in_store".to_string(),
        originating_terminal_id: terminal_id.to_string(),
        sync_status: SyncStatus::Pending,
        created_at: Utc::now(),
        completed_at: Some(Utc::now()),
        metadata: serde_json::json!({}),
        items: vec![item],
        payments: vec![],
    }
}

/// An in-memory store with one product (at `initial_stock`) and one employee
/// seeded, ready for `transaction_insert`/`apply_envelope` calls.
pub async fn seeded_pool(product_id: &str, initial_stock: i64) -> Result<SqlitePool> {
    let pool = pos_db::connect_in_memory().await?;
    pos_db::product_upsert(&pool, &sample_product(product_id)).await?;
    pos_db::employee_upsert(&pool, &sample_employee()).await?;
    pos_db::inventory_overwrite(&pool, product_id, initial_stock, 0, Utc::now()).await?;
    Ok(pool)
}

/// Wraps `payload` in the envelope shape a `PeerClient` would send on the
/// wire, as if `from_terminal` had just drained it from its outbox.
pub fn envelope_for(payload: &TopicPayload, from_terminal: &str) -> PeerEnvelope {
    PeerEnvelope {
        id: pos_schemas::new_ulid(),
        from_terminal: from_terminal.to_string(),
        topic: payload.topic().as_str().to_string(),
        payload: payload.to_json().expect("payload serializes"),
        timestamp: Utc::now(),
    }
}
