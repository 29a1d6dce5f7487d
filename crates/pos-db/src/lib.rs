//! The embedded transactional store (§4.1): business tables plus the
//! `outbox`/`inbox_processed` durable message log.
//!
//! Every function here takes an executor — either `&SqlitePool` or a
//! `&mut Transaction<'_, Sqlite>` — so a caller can compose several of these
//! calls inside one open transaction (the outbox pattern's entire point is
//! that `publish` must share the transaction of the business write it rides
//! along with).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pos_schemas::{new_ulid, Topic, TopicPayload};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;

pub const ENV_DB_URL: &str = "POS_DATABASE_URL";

/// Open (creating if absent) a SQLite store at `path`, with the pragmas
/// §4.1 calls for: WAL journaling, `synchronous=NORMAL`, foreign keys on.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .with_context(|| format!("invalid store path {}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await
        .context("failed to open store")?;
    Ok(pool)
}

/// Test helper: an in-memory store with migrations already applied.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .context("failed to open in-memory store")?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded migrations (§3's business tables plus outbox/inbox_processed).
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("store migration failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub connectivity_ok: bool,
    pub pending_outbox: i64,
    pub error_outbox: i64,
}

pub async fn status(pool: &SqlitePool) -> Result<StoreStatus> {
    let (one,): (i64,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let pending = outbox_count_by_status(pool, "pending").await?;
    let errored = outbox_count_by_status(pool, "error").await?;
    Ok(StoreStatus {
        connectivity_ok: one == 1,
        pending_outbox: pending,
        error_outbox: errored,
    })
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

// -----------------------------
// Outbox (§4.1, §4.2)
// -----------------------------

#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: String,
    pub topic: String,
    pub payload: Value,
    pub status: String,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub peer_acked_at: Option<DateTime<Utc>>,
    pub cloud_acked_at: Option<DateTime<Utc>>,
}

impl OutboxRow {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let payload_text: String = row.try_get("payload")?;
        Ok(OutboxRow {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            payload: serde_json::from_str(&payload_text).unwrap_or(Value::Null),
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            created_at: row.try_get("created_at")?,
            peer_acked_at: row.try_get("peer_acked_at")?,
            cloud_acked_at: row.try_get("cloud_acked_at")?,
        })
    }

    pub fn decode_payload(&self) -> Result<TopicPayload, pos_schemas::envelope::DecodeError> {
        TopicPayload::from_topic_and_json(&self.topic, &self.payload)
    }
}

/// Append one outbox row with status `pending` inside whatever transaction
/// `exec` belongs to. Returns the freshly generated ULID id.
///
/// Caller is responsible for opening (and committing or rolling back) the
/// transaction — `publish` itself never commits, so a rollback of the
/// business write it rode along with rolls the outbox row back too.
pub async fn publish<'e, E>(exec: E, payload: &TopicPayload) -> Result<String>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = new_ulid();
    let topic = payload.topic();
    let payload_json = payload.to_json().context("serializing outbox payload")?;

    sqlx::query(
        r#"
        insert into outbox (id, topic, payload, status, retry_count, created_at)
        values (?1, ?2, ?3, 'pending', 0, ?4)
        "#,
    )
    .bind(&id)
    .bind(topic.as_str())
    .bind(payload_json.to_string())
    .bind(now_str())
    .execute(exec)
    .await
    .context("publish failed")?;

    Ok(id)
}

pub enum AckStage {
    Peer,
    Cloud,
}

/// `markSent(id, stage)` — transition `pending → peer_ack` or
/// `peer_ack → cloud_ack`, stamping the matching timestamp.
pub async fn mark_sent(pool: &SqlitePool, id: &str, stage: AckStage) -> Result<bool> {
    let (column, prior_status, new_status) = match stage {
        AckStage::Peer => ("peer_acked_at", "pending", "peer_ack"),
        AckStage::Cloud => ("cloud_acked_at", "peer_ack", "cloud_ack"),
    };
    let query = format!(
        "update outbox set status = ?1, {column} = ?2 where id = ?3 and status = ?4 returning id",
        column = column
    );
    let row: Option<(String,)> = sqlx::query_as(&query)
        .bind(new_status)
        .bind(now_str())
        .bind(id)
        .bind(prior_status)
        .fetch_optional(pool)
        .await
        .context("mark_sent failed")?;
    Ok(row.is_some())
}

/// `markError(id)` — sets status to `error`, the dead-letter terminal state.
pub async fn mark_error(pool: &SqlitePool, id: &str) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        "update outbox set status = 'error' where id = ?1 and status in ('pending', 'peer_ack') returning id",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("mark_error failed")?;
    Ok(row.is_some())
}

pub async fn increment_retries(pool: &SqlitePool, id: &str) -> Result<i64> {
    let (retry_count,): (i64,) = sqlx::query_as(
        "update outbox set retry_count = retry_count + 1 where id = ?1 returning retry_count",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .context("increment_retries failed")?;
    Ok(retry_count)
}

/// `getPending(status, limit)` — oldest-first (ULID order) rows at `status`.
pub async fn get_by_status(pool: &SqlitePool, status: &str, limit: i64) -> Result<Vec<OutboxRow>> {
    let rows = sqlx::query(
        "select id, topic, payload, status, retry_count, created_at, peer_acked_at, cloud_acked_at
         from outbox where status = ?1 order by id asc limit ?2",
    )
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("get_by_status failed")?;

    rows.into_iter().map(OutboxRow::from_row).collect::<Result<_, _>>().map_err(Into::into)
}

pub async fn outbox_count_by_status(pool: &SqlitePool, status: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("select count(*) from outbox where status = ?1")
        .bind(status)
        .fetch_one(pool)
        .await
        .context("outbox_count_by_status failed")?;
    Ok(count)
}

// -----------------------------
// Inbox (§4.1, §4.3)
// -----------------------------

/// Idempotent insert: returns `Ok(true)` if this is the first time `message_id`
/// has been seen, `Ok(false)` if it is a benign duplicate (§3 failure
/// semantics: unique-violation on inbox insert is not an error).
pub async fn inbox_insert_deduped<'e, E>(
    exec: E,
    message_id: &str,
    source_terminal: &str,
    topic: &str,
    payload: &Value,
) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        insert into inbox_processed (message_id, source_terminal, topic, payload, processed_at)
        values (?1, ?2, ?3, ?4, ?5)
        on conflict (message_id) do nothing
        returning message_id
        "#,
    )
    .bind(message_id)
    .bind(source_terminal)
    .bind(topic)
    .bind(payload.to_string())
    .bind(now_str())
    .fetch_optional(exec)
    .await
    .context("inbox_insert_deduped failed")?;

    Ok(row.is_some())
}

pub async fn inbox_contains(pool: &SqlitePool, message_id: &str) -> Result<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("select message_id from inbox_processed where message_id = ?1")
            .bind(message_id)
            .fetch_optional(pool)
            .await
            .context("inbox_contains failed")?;
    Ok(row.is_some())
}

// -----------------------------
// Inventory (§3, §4.5, §4.6)
// -----------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InventoryRow {
    pub product_id: String,
    pub current_stock: i64,
    pub reserved_stock: i64,
    pub last_updated: DateTime<Utc>,
    pub last_synced: Option<DateTime<Utc>>,
}

pub async fn inventory_get(pool: &SqlitePool, product_id: &str) -> Result<Option<InventoryRow>> {
    let row = sqlx::query_as::<_, InventoryRow>(
        "select product_id, current_stock, reserved_stock, last_updated, last_synced
         from inventory where product_id = ?1",
    )
    .bind(product_id)
    .fetch_optional(pool)
    .await
    .context("inventory_get failed")?;
    Ok(row)
}

/// Every product id, oldest-id-first, for checksum computation (§4.6:
/// ordered by productId).
pub async fn inventory_list_all(pool: &SqlitePool) -> Result<Vec<InventoryRow>> {
    let rows = sqlx::query_as::<_, InventoryRow>(
        "select product_id, current_stock, reserved_stock, last_updated, last_synced
         from inventory order by product_id asc",
    )
    .fetch_all(pool)
    .await
    .context("inventory_list_all failed")?;
    Ok(rows)
}

/// Apply a signed delta to one product's stock inside `tx`, enforcing the
/// invariant `current_stock >= 0`. Creates the row at zero stock on first
/// touch.
pub async fn inventory_apply_delta(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    product_id: &str,
    delta: i64,
) -> Result<i64> {
    sqlx::query(
        r#"
        insert into inventory (product_id, current_stock, reserved_stock, last_updated)
        values (?1, 0, 0, ?2)
        on conflict (product_id) do nothing
        "#,
    )
    .bind(product_id)
    .bind(now_str())
    .execute(&mut **tx)
    .await
    .context("inventory_apply_delta: seed row failed")?;

    let row: (i64,) = sqlx::query_as(
        r#"
        update inventory
           set current_stock = current_stock + ?1,
               last_updated  = ?2
         where product_id = ?3
        returning current_stock
        "#,
    )
    .bind(delta)
    .bind(now_str())
    .bind(product_id)
    .fetch_one(&mut **tx)
    .await
    .context("inventory_apply_delta: update failed")?;

    if row.0 < 0 {
        anyhow::bail!("inventory invariant violated: {product_id} would go negative");
    }
    Ok(row.0)
}

/// Overwrite a product's stock wholesale (used by the reconciler when it
/// resolves a divergence in favor of the winning terminal, §4.6).
pub async fn inventory_overwrite<'e, E>(
    exec: E,
    product_id: &str,
    current_stock: i64,
    reserved_stock: i64,
    last_updated: DateTime<Utc>,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        insert into inventory (product_id, current_stock, reserved_stock, last_updated, last_synced)
        values (?1, ?2, ?3, ?4, ?5)
        on conflict (product_id) do update set
            current_stock = excluded.current_stock,
            reserved_stock = excluded.reserved_stock,
            last_updated = excluded.last_updated,
            last_synced = excluded.last_synced
        "#,
    )
    .bind(product_id)
    .bind(current_stock)
    .bind(reserved_stock)
    .bind(last_updated)
    .bind(now_str())
    .execute(exec)
    .await
    .context("inventory_overwrite failed")?;
    Ok(())
}

pub async fn inventory_change_insert<'e, E>(
    exec: E,
    product_id: &str,
    change_type: &str,
    delta: i64,
    resulting_stock: i64,
    originating_terminal_id: &str,
    originating_employee_id: Option<&str>,
    transaction_id: Option<&str>,
    transaction_item_id: Option<&str>,
) -> Result<String>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = new_ulid();
    sqlx::query(
        r#"
        insert into inventory_changes
            (id, product_id, change_type, delta, resulting_stock,
             originating_terminal_id, originating_employee_id,
             transaction_id, transaction_item_id, created_at)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&id)
    .bind(product_id)
    .bind(change_type)
    .bind(delta)
    .bind(resulting_stock)
    .bind(originating_terminal_id)
    .bind(originating_employee_id)
    .bind(transaction_id)
    .bind(transaction_item_id)
    .bind(now_str())
    .execute(exec)
    .await
    .context("inventory_change_insert failed")?;
    Ok(id)
}

// -----------------------------
// Products (§3, §4.4)
// -----------------------------

pub async fn product_upsert<'e, E>(exec: E, product: &pos_schemas::Product) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        insert into products
            (id, sku, name, category, size, cost_cents, retail_price_cents,
             parent_product_id, units_per_parent, loyalty_multiplier, active,
             created_at, updated_at)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        on conflict (id) do update set
            sku = excluded.sku,
            name = excluded.name,
            category = excluded.category,
            size = excluded.size,
            cost_cents = excluded.cost_cents,
            retail_price_cents = excluded.retail_price_cents,
            parent_product_id = excluded.parent_product_id,
            units_per_parent = excluded.units_per_parent,
            loyalty_multiplier = excluded.loyalty_multiplier,
            active = excluded.active,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&product.id)
    .bind(&product.sku)
    .bind(&product.name)
    .bind(serde_json::to_value(product.category)?.as_str().unwrap_or_default())
    .bind(serde_json::to_value(product.size)?.as_str().unwrap_or_default())
    .bind(product.cost_cents.0)
    .bind(product.retail_price_cents.0)
    .bind(&product.parent_product_id)
    .bind(product.units_per_parent)
    .bind(product.loyalty_multiplier)
    .bind(product.active)
    .bind(product.created_at)
    .bind(product.updated_at)
    .execute(exec)
    .await
    .context("product_upsert failed")?;
    Ok(())
}

pub async fn product_exists(pool: &SqlitePool, id: &str) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as("select id from products where id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("product_exists failed")?;
    Ok(row.is_some())
}

// -----------------------------
// Employees (§3, §4.4)
// -----------------------------

pub async fn employee_upsert<'e, E>(exec: E, employee: &pos_schemas::Employee) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        insert into employees (id, code, first_name, last_name, pin_hash, active, capabilities)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        on conflict (id) do update set
            code = excluded.code,
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            pin_hash = excluded.pin_hash,
            active = excluded.active,
            capabilities = excluded.capabilities
        "#,
    )
    .bind(&employee.id)
    .bind(&employee.code)
    .bind(&employee.first_name)
    .bind(&employee.last_name)
    .bind(&employee.pin_hash)
    .bind(employee.active)
    .bind(employee.capabilities.bits() as i64)
    .execute(exec)
    .await
    .context("employee_upsert failed")?;
    Ok(())
}

// -----------------------------
// Transactions (§3, §4.4)
// -----------------------------

/// Insert a completed sale's full tree (transaction + items + payments)
/// inside `tx`'s transaction. Callers append inventory deltas, an
/// `inventory_changes` audit row per item, and the outbox publish(es) in the
/// same transaction before committing.
pub async fn transaction_insert(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    txn: &pos_schemas::Transaction,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into transactions
            (id, transaction_number, employee_id, customer_id, subtotal_cents,
             tax_cents, discount_cents, total_cents, points_earned, points_redeemed,
             status, sales_channel, originating_terminal_id, sync_status,
             created_at, completed_at, metadata)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        "#,
    )
    .bind(&txn.id)
    .bind(&txn.transaction_number)
    .bind(&txn.employee_id)
    .bind(&txn.customer_id)
    .bind(txn.subtotal_cents.0)
    .bind(txn.tax_cents.0)
    .bind(txn.discount_cents.0)
    .bind(txn.total_cents.0)
    .bind(txn.points_earned)
    .bind(txn.points_redeemed)
    .bind(serde_json::to_value(txn.status)?.as_str().unwrap_or_default())
    .bind(&txn.sales_channel)
    .bind(&txn.originating_terminal_id)
    .bind(serde_json::to_value(txn.sync_status)?.as_str().unwrap_or_default())
    .bind(txn.created_at)
    .bind(txn.completed_at)
    .bind(txn.metadata.to_string())
    .execute(&mut **tx)
    .await
    .context("transaction_insert failed")?;

    for item in &txn.items {
        sqlx::query(
            r#"
            insert into transaction_items
                (id, transaction_id, product_id, quantity, unit_price_cents,
                 discount_cents, total_price_cents, discount_reason, returned)
            values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&item.id)
        .bind(&item.transaction_id)
        .bind(&item.product_id)
        .bind(item.quantity)
        .bind(item.unit_price_cents.0)
        .bind(item.discount_cents.0)
        .bind(item.total_price_cents.0)
        .bind(&item.discount_reason)
        .bind(item.returned)
        .execute(&mut **tx)
        .await
        .context("transaction_item insert failed")?;
    }

    for payment in &txn.payments {
        sqlx::query(
            r#"
            insert into payments
                (id, transaction_id, method, amount_cents, last_four, card_type,
                 auth_code, tendered_cents, change_cents, gift_card_id, points_used)
            values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.transaction_id)
        .bind(serde_json::to_value(payment.method)?.as_str().unwrap_or_default())
        .bind(payment.amount_cents.0)
        .bind(&payment.last_four)
        .bind(&payment.card_type)
        .bind(&payment.auth_code)
        .bind(payment.tendered_cents.map(|c| c.0))
        .bind(payment.change_cents.map(|c| c.0))
        .bind(&payment.gift_card_id)
        .bind(payment.points_used)
        .execute(&mut **tx)
        .await
        .context("payment insert failed")?;
    }

    Ok(())
}

pub async fn transaction_exists(pool: &SqlitePool, id: &str) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as("select id from transactions where id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("transaction_exists failed")?;
    Ok(row.is_some())
}

// -----------------------------
// Discount rules / pos config (§4.2 "discount_rule:upsert", "pos_config:update")
// -----------------------------

pub async fn discount_rule_upsert<'e, E>(exec: E, id: &str, rule: &Value) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        insert into discount_rules (id, rule_json, updated_at)
        values (?1, ?2, ?3)
        on conflict (id) do update set rule_json = excluded.rule_json, updated_at = excluded.updated_at
        "#,
    )
    .bind(id)
    .bind(rule.to_string())
    .bind(now_str())
    .execute(exec)
    .await
    .context("discount_rule_upsert failed")?;
    Ok(())
}

pub async fn pos_config_upsert<'e, E>(exec: E, key: &str, value: &Value) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        insert into pos_config (key, value_json, updated_at)
        values (?1, ?2, ?3)
        on conflict (key) do update set value_json = excluded.value_json, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .bind(now_str())
    .execute(exec)
    .await
    .context("pos_config_upsert failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pos_schemas::envelope::InventoryUpdatePayload;

    #[tokio::test]
    async fn publish_then_get_pending_returns_the_row_in_ulid_order() {
        let pool = connect_in_memory().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let id1 = publish(
            &mut tx,
            &TopicPayload::InventoryUpdate(InventoryUpdatePayload { product_id: "p1".into(), delta: -1 }),
        )
        .await
        .unwrap();
        let id2 = publish(
            &mut tx,
            &TopicPayload::InventoryUpdate(InventoryUpdatePayload { product_id: "p1".into(), delta: -1 }),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let pending = get_by_status(&pool, "pending", 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, id1);
        assert_eq!(pending[1].id, id2);
    }

    #[tokio::test]
    async fn publish_rolls_back_with_its_transaction() {
        let pool = connect_in_memory().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        publish(
            &mut tx,
            &TopicPayload::InventoryUpdate(InventoryUpdatePayload { product_id: "p1".into(), delta: -1 }),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let pending = get_by_status(&pool, "pending", 10).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn mark_sent_transitions_pending_to_peer_ack() {
        let pool = connect_in_memory().await.unwrap();
        let id = publish(
            &pool,
            &TopicPayload::InventoryUpdate(InventoryUpdatePayload { product_id: "p1".into(), delta: -1 }),
        )
        .await
        .unwrap();
        assert!(mark_sent(&pool, &id, AckStage::Peer).await.unwrap());

        let rows = get_by_status(&pool, "peer_ack", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].peer_acked_at.is_some());
    }

    #[tokio::test]
    async fn inbox_insert_deduped_rejects_a_second_insert_of_the_same_id() {
        let pool = connect_in_memory().await.unwrap();
        let payload = serde_json::json!({ "product_id": "p1", "delta": -1 });
        let first = inbox_insert_deduped(&pool, "msg-1", "L2", "inventory:update", &payload)
            .await
            .unwrap();
        let second = inbox_insert_deduped(&pool, "msg-1", "L2", "inventory:update", &payload)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn inventory_apply_delta_rejects_negative_stock() {
        let pool = connect_in_memory().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        inventory_apply_delta(&mut tx, "p1", 5).await.unwrap();
        let err = inventory_apply_delta(&mut tx, "p1", -10).await.unwrap_err();
        assert!(err.to_string().contains("invariant"));
    }

    #[tokio::test]
    async fn inventory_apply_delta_seeds_a_zero_row_on_first_touch() {
        let pool = connect_in_memory().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let stock = inventory_apply_delta(&mut tx, "p1", 3).await.unwrap();
        assert_eq!(stock, 3);
        tx.commit().await.unwrap();
        let row = inventory_get(&pool, "p1").await.unwrap().unwrap();
        assert_eq!(row.current_stock, 3);
    }
}
