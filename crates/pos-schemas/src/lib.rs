//! Shared domain types for the POS synchronization core.
//!
//! Everything here is a plain data type with no I/O: the store (`pos-db`),
//! the peer fabric (`pos-peer`), the cloud uplink (`pos-cloud`), and the
//! reconciler (`pos-reconcile`) all exchange these types instead of raw JSON.

pub mod envelope;
pub mod money;

pub use envelope::{Topic, TopicPayload, UnknownTopic};
pub use money::Cents;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Alcohol category. Drives tax/licensing rules that live outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    Wine,
    Liquor,
    Beer,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSize {
    Ml750,
    L1,
    L1_5,
    L1_75,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub category: ProductCategory,
    pub size: ProductSize,
    pub cost_cents: Cents,
    pub retail_price_cents: Cents,
    pub parent_product_id: Option<String>,
    pub units_per_parent: Option<i64>,
    pub loyalty_multiplier: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductBarcode {
    pub id: String,
    pub product_id: String,
    pub barcode: String,
    pub is_primary: bool,
}

/// One row per product. Co-owned by every terminal (§4.5/§4.6).
///
/// Invariant enforced by every writer: `current_stock >= 0` and
/// `reserved_stock <= current_stock`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub product_id: String,
    pub current_stock: i64,
    pub reserved_stock: i64,
    pub last_updated: DateTime<Utc>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryChangeType {
    Sale,
    Return,
    Adjustment,
    Receive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryChange {
    pub id: String,
    pub product_id: String,
    pub change_type: InventoryChangeType,
    pub delta: i64,
    pub resulting_stock: i64,
    pub originating_terminal_id: String,
    pub originating_employee_id: Option<String>,
    pub transaction_id: Option<String>,
    pub transaction_item_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

bitflags::bitflags! {
    /// Employee capability bits (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EmployeeCapabilities: u32 {
        const CAN_OVERRIDE_PRICE = 0b001;
        const CAN_VOID_TRANSACTION = 0b010;
        const IS_MANAGER = 0b100;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub code: String,
    pub first_name: String,
    pub last_name: String,
    pub pin_hash: String,
    pub active: bool,
    pub capabilities: EmployeeCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Voided,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub transaction_number: String,
    pub employee_id: String,
    pub customer_id: Option<String>,
    pub subtotal_cents: Cents,
    pub tax_cents: Cents,
    pub discount_cents: Cents,
    pub total_cents: Cents,
    pub points_earned: i64,
    pub points_redeemed: i64,
    pub status: TransactionStatus,
    pub sales_channel: String,
    pub originating_terminal_id: String,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub items: Vec<TransactionItem>,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionItem {
    pub id: String,
    pub transaction_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: Cents,
    pub discount_cents: Cents,
    pub total_price_cents: Cents,
    pub discount_reason: Option<String>,
    pub returned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Credit,
    Debit,
    GiftCard,
    LoyaltyPoints,
    EmployeeTab,
    ThirdParty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub transaction_id: String,
    pub method: PaymentMethod,
    pub amount_cents: Cents,
    pub last_four: Option<String>,
    pub card_type: Option<String>,
    pub auth_code: Option<String>,
    pub tendered_cents: Option<Cents>,
    pub change_cents: Option<Cents>,
    pub gift_card_id: Option<String>,
    pub points_used: Option<i64>,
}

/// Generate a fresh ULID-backed id, rendered as its canonical string form.
///
/// ULIDs are used (rather than UUIDv4) specifically so that ids generated
/// close together in time sort lexicographically the same way they were
/// created — the property the outbox and transaction-number schemes rely on.
pub fn new_ulid() -> String {
    Ulid::new().to_string()
}

/// Parse a previously-generated id back into a `Ulid` for ordering comparisons.
pub fn parse_ulid(s: &str) -> Result<Ulid, ulid::DecodeError> {
    s.parse()
}
