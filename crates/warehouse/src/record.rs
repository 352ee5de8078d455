//! Current stock state for one equipment item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use equiptrack_core::{DomainError, DomainResult, ItemId};

use crate::movement::MovementKind;
use crate::status::{derive_status, ItemStatus};

/// Registration attributes for a new item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDraft {
    pub name: String,
    pub serial_number: String,
    pub category: String,
    pub description: String,
    pub manufacturer: String,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub quantity: i64,
    pub min_quantity: i64,
    pub location: String,
    pub purchase_date: Option<DateTime<Utc>>,
    pub warranty_expiry: Option<DateTime<Utc>>,
}

impl ItemDraft {
    pub fn validate(&self) -> DomainResult<()> {
        for (field, value) in [
            ("name", &self.name),
            ("serial_number", &self.serial_number),
            ("category", &self.category),
            ("location", &self.location),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::validation(format!("{field} cannot be empty")));
            }
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if self.min_quantity < 0 {
            return Err(DomainError::validation("min_quantity cannot be negative"));
        }
        Ok(())
    }
}

/// The derived current state for one item.
///
/// Quantity and status are owned by the transaction coordinator: they change
/// only through a committed movement. Everything else is descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub id: ItemId,
    pub name: String,
    pub serial_number: String,
    pub category: String,
    pub description: String,
    pub manufacturer: String,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub quantity: i64,
    pub min_quantity: i64,
    pub location: String,
    pub purchase_date: Option<DateTime<Utc>>,
    pub warranty_expiry: Option<DateTime<Utc>>,
    pub status: ItemStatus,
    /// Archived items stay in the store (their ledger references them) but
    /// reject further movements.
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// Create the record for a validated draft.
    pub fn register(id: ItemId, draft: ItemDraft, now: DateTime<Utc>) -> Self {
        let status = derive_status(draft.quantity, draft.min_quantity);
        Self {
            id,
            name: draft.name,
            serial_number: draft.serial_number,
            category: draft.category,
            description: draft.description,
            manufacturer: draft.manufacturer,
            unit_price: draft.unit_price,
            quantity: draft.quantity,
            min_quantity: draft.min_quantity,
            location: draft.location,
            purchase_date: draft.purchase_date,
            warranty_expiry: draft.warranty_expiry,
            status,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Decide the outcome of applying a movement to the current state.
    ///
    /// Pure decision logic. The coordinator calls this inside the per-item
    /// critical section, so sufficiency is checked in the same atomic unit
    /// that applies the delta (no check-then-commit race).
    pub fn movement_outcome(
        &self,
        kind: MovementKind,
        quantity: i64,
    ) -> DomainResult<(i64, ItemStatus)> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if kind.is_outbound() && quantity > self.quantity {
            return Err(DomainError::insufficient_stock(self.quantity, quantity));
        }

        let new_quantity = self.quantity + kind.signed_delta(quantity);
        Ok((new_quantity, derive_status(new_quantity, self.min_quantity)))
    }

    /// The record after a committed movement.
    pub fn applied(
        &self,
        new_quantity: i64,
        new_status: ItemStatus,
        now: DateTime<Utc>,
    ) -> Self {
        let mut next = self.clone();
        next.quantity = new_quantity;
        next.status = new_status;
        next.updated_at = now;
        next
    }
}
