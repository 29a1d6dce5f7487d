//! The outbox/inbox wire envelope and its tagged-union payload.
//!
//! §4.2 names a closed set of recognized topics and the REDESIGN FLAGS in §9
//! call for replacing a dynamic "any" payload switched on by a string with a
//! sum type. [`Topic`] is the string-keyed slug stored alongside the opaque
//! JSON blob on disk and on the wire; [`TopicPayload`] is the typed value the
//! rest of the system actually works with. Conversion between the two is the
//! single seam where an unrecognized topic becomes a typed, recoverable
//! [`UnknownTopic`] error rather than a silent `match` fallthrough scattered
//! across every receiver.

use crate::{Employee, Product, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    TransactionNew,
    InventoryUpdate,
    InventoryChecksum,
    EmployeeUpsert,
    ProductUpsert,
    DiscountRuleUpsert,
    PosConfigUpdate,
}

#[derive(Debug, Error)]
#[error("unrecognized topic {0:?}")]
pub struct UnknownTopic(pub String);

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::TransactionNew => "transaction:new",
            Topic::InventoryUpdate => "inventory:update",
            Topic::InventoryChecksum => "inventory:checksum",
            Topic::EmployeeUpsert => "employee:upsert",
            Topic::ProductUpsert => "product:upsert",
            Topic::DiscountRuleUpsert => "discount_rule:upsert",
            Topic::PosConfigUpdate => "pos_config:update",
        }
    }

    pub fn parse(s: &str) -> Result<Topic, UnknownTopic> {
        Ok(match s {
            "transaction:new" => Topic::TransactionNew,
            "inventory:update" => Topic::InventoryUpdate,
            "inventory:checksum" => Topic::InventoryChecksum,
            "employee:upsert" => Topic::EmployeeUpsert,
            "product:upsert" => Topic::ProductUpsert,
            "discount_rule:upsert" => Topic::DiscountRuleUpsert,
            "pos_config:update" => Topic::PosConfigUpdate,
            other => return Err(UnknownTopic(other.to_string())),
        })
    }

    /// The cloud ingest path slug for this topic (§6: `.../ingest/<topic-slug>`).
    pub fn cloud_slug(self) -> &'static str {
        match self {
            Topic::TransactionNew => "transaction",
            Topic::InventoryUpdate => "inventory-update",
            Topic::InventoryChecksum => "inventory-checksum",
            Topic::EmployeeUpsert => "employee",
            Topic::ProductUpsert => "product",
            Topic::DiscountRuleUpsert => "discount-rule",
            Topic::PosConfigUpdate => "pos-config",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryUpdatePayload {
    pub product_id: String,
    pub delta: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryChecksumPayload {
    pub checksum: String,
    pub row_count: i64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductUpsertPayload {
    pub product: Product,
    pub inventory: Option<ProductUpsertInventory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductUpsertInventory {
    pub current_stock: i64,
    pub reserved_stock: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountRuleUpsertPayload {
    pub id: String,
    pub rule: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosConfigUpdatePayload {
    pub key: String,
    pub value: Value,
}

/// The typed payload carried by one outbox/inbox row, keyed by [`Topic`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TopicPayload {
    TransactionNew(Box<Transaction>),
    InventoryUpdate(InventoryUpdatePayload),
    InventoryChecksum(InventoryChecksumPayload),
    EmployeeUpsert(Box<Employee>),
    ProductUpsert(ProductUpsertPayload),
    DiscountRuleUpsert(DiscountRuleUpsertPayload),
    PosConfigUpdate(PosConfigUpdatePayload),
}

impl TopicPayload {
    pub fn topic(&self) -> Topic {
        match self {
            TopicPayload::TransactionNew(_) => Topic::TransactionNew,
            TopicPayload::InventoryUpdate(_) => Topic::InventoryUpdate,
            TopicPayload::InventoryChecksum(_) => Topic::InventoryChecksum,
            TopicPayload::EmployeeUpsert(_) => Topic::EmployeeUpsert,
            TopicPayload::ProductUpsert(_) => Topic::ProductUpsert,
            TopicPayload::DiscountRuleUpsert(_) => Topic::DiscountRuleUpsert,
            TopicPayload::PosConfigUpdate(_) => Topic::PosConfigUpdate,
        }
    }

    /// Serialize the payload alone (without the topic tag) for storage in
    /// the outbox/inbox `payload` column.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            TopicPayload::TransactionNew(v) => serde_json::to_value(v),
            TopicPayload::InventoryUpdate(v) => serde_json::to_value(v),
            TopicPayload::InventoryChecksum(v) => serde_json::to_value(v),
            TopicPayload::EmployeeUpsert(v) => serde_json::to_value(v),
            TopicPayload::ProductUpsert(v) => serde_json::to_value(v),
            TopicPayload::DiscountRuleUpsert(v) => serde_json::to_value(v),
            TopicPayload::PosConfigUpdate(v) => serde_json::to_value(v),
        }
    }

    /// Reconstruct a typed payload from a topic slug and its stored/wire JSON
    /// blob. Returns [`UnknownTopic`] for anything not in §4.2's table
    /// (logged and dropped by the caller, per spec).
    pub fn from_topic_and_json(topic: &str, payload: &Value) -> Result<Self, DecodeError> {
        let topic = Topic::parse(topic)?;
        Ok(match topic {
            Topic::TransactionNew => TopicPayload::TransactionNew(Box::new(
                serde_json::from_value(payload.clone())?,
            )),
            Topic::InventoryUpdate => {
                TopicPayload::InventoryUpdate(serde_json::from_value(payload.clone())?)
            }
            Topic::InventoryChecksum => {
                TopicPayload::InventoryChecksum(serde_json::from_value(payload.clone())?)
            }
            Topic::EmployeeUpsert => {
                TopicPayload::EmployeeUpsert(Box::new(serde_json::from_value(payload.clone())?))
            }
            Topic::ProductUpsert => {
                TopicPayload::ProductUpsert(serde_json::from_value(payload.clone())?)
            }
            Topic::DiscountRuleUpsert => {
                TopicPayload::DiscountRuleUpsert(serde_json::from_value(payload.clone())?)
            }
            Topic::PosConfigUpdate => {
                TopicPayload::PosConfigUpdate(serde_json::from_value(payload.clone())?)
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    UnknownTopic(#[from] UnknownTopic),
    #[error("payload did not match topic's expected shape: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The frame a sender transmits on a peer connection (§6 "Peer wire protocol").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEnvelope {
    pub id: String,
    #[serde(rename = "fromTerminal")]
    pub from_terminal: String,
    pub topic: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Replies a `PeerServer` can send back on the same connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerReply {
    Ack {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    Error {
        reason: String,
    },
}

/// A row of the reconciliation snapshot exchanged by the sub-protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshotRow {
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(rename = "currentStock")]
    pub current_stock: i64,
    #[serde(rename = "reservedStock")]
    pub reserved_stock: i64,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

/// Sub-protocol frames exchanged in addition to the main envelope/reply pair
/// (§4.3 "Reconciliation sub-protocol", §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconcileFrame {
    InventoryRequest {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    InventoryResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        inventory: Vec<InventorySnapshotRow>,
        #[serde(rename = "generated-at")]
        generated_at: DateTime<Utc>,
    },
}

/// Any frame that can arrive on a peer connection: a replication envelope,
/// a reply, or a reconciliation sub-frame. Kept as one enum so the
/// connection's read loop has a single decode point (§9 REDESIGN FLAGS:
/// "explicit event loop over {incoming-frame, ...}").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeerFrame {
    Reply(PeerReply),
    Reconcile(ReconcileFrame),
    Envelope(PeerEnvelope),
}
