//! Domain facts published after a successful commit.
//!
//! Facts are ephemeral: the core does not persist them, ownership transfers
//! to the broker on publish. Delivery is at-most-once from the producer side,
//! so consumers de-duplicate by `event_id` (or by the ledger identity carried
//! in the payload).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use equiptrack_core::{ItemId, LedgerEntryId};
use equiptrack_warehouse::{ItemStatus, LedgerEntry, MovementKind, StockRecord};

/// Routing topics on the fact surface.
pub mod topics {
    /// Emitted once when an item is registered.
    pub const EQUIPMENT_CREATED: &str = "equipment.created";
    /// Emitted after every committed movement.
    pub const TRANSACTION_COMMITTED: &str = "transaction.committed";
    /// Emitted by the reconciliation checker when paperwork is missing.
    pub const DOCUMENTATION_REQUIRED: &str = "documentation.required";

    /// Legacy routing keys from the era when commit facts were split across
    /// the invoice queue. Kept so consumers that still bind them keep
    /// receiving; new consumers should bind the topics above.
    pub const LEGACY_INVOICE_CREATED: &str = "invoice.created";
    pub const LEGACY_INVOICE_REQUIRED: &str = "invoice.required";
}

/// Fact: a new item was registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentCreated {
    pub item_id: ItemId,
    pub name: String,
    pub serial_number: String,
    pub category: String,
    pub description: String,
    pub manufacturer: String,
    pub location: String,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

impl EquipmentCreated {
    pub fn from_record(record: &StockRecord) -> Self {
        Self {
            item_id: record.id,
            name: record.name.clone(),
            serial_number: record.serial_number.clone(),
            category: record.category.clone(),
            description: record.description.clone(),
            manufacturer: record.manufacturer.clone(),
            location: record.location.clone(),
            status: record.status,
            created_at: record.created_at,
        }
    }
}

/// Fact: a movement was committed (ledger entry + stock update persisted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCommitted {
    pub entry_id: LedgerEntryId,
    pub item_id: ItemId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub quantity_delta: i64,
    pub new_quantity: i64,
    pub new_status: ItemStatus,
    pub recorded_at: DateTime<Utc>,
}

impl TransactionCommitted {
    pub fn from_commit(entry: &LedgerEntry, new_quantity: i64, new_status: ItemStatus) -> Self {
        Self {
            entry_id: entry.id,
            item_id: entry.item_id,
            kind: entry.kind,
            quantity: entry.quantity(),
            quantity_delta: entry.quantity_delta,
            new_quantity,
            new_status,
            recorded_at: entry.recorded_at,
        }
    }
}

/// Fact: a committed movement has no accompanying paperwork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentationRequired {
    pub entry_id: LedgerEntryId,
    pub kind: MovementKind,
    pub noticed_at: DateTime<Utc>,
}

/// A fact that has already been committed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    EquipmentCreated(EquipmentCreated),
    TransactionCommitted(TransactionCommitted),
    DocumentationRequired(DocumentationRequired),
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::EquipmentCreated(_) => topics::EQUIPMENT_CREATED,
            DomainEvent::TransactionCommitted(_) => topics::TRANSACTION_COMMITTED,
            DomainEvent::DocumentationRequired(_) => topics::DOCUMENTATION_REQUIRED,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::EquipmentCreated(e) => e.created_at,
            DomainEvent::TransactionCommitted(e) => e.recorded_at,
            DomainEvent::DocumentationRequired(e) => e.noticed_at,
        }
    }

    /// Flat JSON payload as consumers see it on the wire.
    pub fn payload(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            DomainEvent::EquipmentCreated(e) => serde_json::to_value(e),
            DomainEvent::TransactionCommitted(e) => serde_json::to_value(e),
            DomainEvent::DocumentationRequired(e) => serde_json::to_value(e),
        }
    }
}

/// Wire envelope handed to the broker.
///
/// `event_id` gives consumers a stable de-duplication key for at-least-once
/// processing on their side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_id: Uuid,
    pub topic: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl EventMessage {
    pub fn from_event(event: &DomainEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: Uuid::now_v7(),
            topic: event.topic().to_string(),
            occurred_at: event.occurred_at(),
            payload: event.payload()?,
        })
    }
}
