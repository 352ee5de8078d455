//! Immutable ledger entries, one per committed movement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use equiptrack_core::{ItemId, LedgerEntryId};

use crate::movement::{Movement, MovementKind};

/// One stock movement, written once and never updated or deleted.
///
/// Invariant (held by the coordinator): the signed sum of `quantity_delta`
/// over all entries for an item equals that item's current quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub item_id: ItemId,
    pub kind: MovementKind,
    /// Signed: positive for intake/return, negative for issue/adjustment.
    pub quantity_delta: i64,
    pub actor: String,
    pub counterpart: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build the entry for a validated movement request.
    pub fn record(movement: &Movement, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: LedgerEntryId::new(),
            item_id: movement.item_id,
            kind: movement.kind,
            quantity_delta: movement.kind.signed_delta(movement.quantity),
            actor: movement.actor.clone(),
            counterpart: movement.counterpart.clone(),
            reason: movement.reason.clone(),
            notes: movement.notes.clone(),
            recorded_at,
        }
    }

    /// The intake entry written together with a newly registered item.
    pub fn initial_intake(
        item_id: ItemId,
        quantity: i64,
        actor: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            item_id,
            kind: MovementKind::Intake,
            quantity_delta: quantity,
            actor: actor.into(),
            counterpart: None,
            reason: Some("initial registration".to_string()),
            notes: None,
            recorded_at,
        }
    }

    /// Unsigned quantity this entry moved.
    pub fn quantity(&self) -> i64 {
        self.quantity_delta.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_carries_signed_delta() {
        let movement = Movement::new(ItemId::new(), MovementKind::Issue, 4, "storekeeper")
            .with_counterpart("field-team");
        let entry = LedgerEntry::record(&movement, Utc::now());

        assert_eq!(entry.quantity_delta, -4);
        assert_eq!(entry.quantity(), 4);
        assert_eq!(entry.counterpart.as_deref(), Some("field-team"));
    }

    #[test]
    fn initial_intake_is_positive() {
        let entry = LedgerEntry::initial_intake(ItemId::new(), 10, "admin", Utc::now());
        assert_eq!(entry.kind, MovementKind::Intake);
        assert_eq!(entry.quantity_delta, 10);
        assert!(entry.reason.is_some());
    }
}
