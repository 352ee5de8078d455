//! Notification projection.
//!
//! Consumes published facts and materializes per-user notification records
//! behind a durable append/read/mark-read contract. The projection is
//! idempotent under at-least-once delivery: it de-duplicates by `event_id`,
//! so a redelivered fact is a no-op.
//!
//! The warehouse core does not know user identities, so records target the
//! broadcast audience; the notification-reading API (an external
//! collaborator) fans them out.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use equiptrack_events::{
    topics, DocumentationRequired, EquipmentCreated, EventMessage, TransactionCommitted,
};
use equiptrack_warehouse::ItemStatus;

/// Audience for records the warehouse cannot attribute to one user.
pub const BROADCAST_USER: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
    Info,
    Warning,
}

/// One materialized notification record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub severity: NotificationSeverity,
    pub message: String,
    /// Identity of the item or ledger entry this notice is about.
    pub related_to: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Durable notification storage contract. The in-memory implementation is
/// the test double; a real deployment puts a database behind this.
pub trait NotificationStore: Send + Sync {
    fn append(&self, notification: Notification);

    /// Newest first. `unread_only` filters to unread records.
    fn list(&self, unread_only: bool) -> Vec<Notification>;

    /// Returns false when the id is unknown.
    fn mark_read(&self, id: Uuid) -> bool;

    fn unread_count(&self) -> usize;
}

impl<S> NotificationStore for std::sync::Arc<S>
where
    S: NotificationStore + ?Sized,
{
    fn append(&self, notification: Notification) {
        (**self).append(notification)
    }

    fn list(&self, unread_only: bool) -> Vec<Notification> {
        (**self).list(unread_only)
    }

    fn mark_read(&self, id: Uuid) -> bool {
        (**self).mark_read(id)
    }

    fn unread_count(&self) -> usize {
        (**self).unread_count()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    records: RwLock<Vec<Notification>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn append(&self, notification: Notification) {
        if let Ok(mut records) = self.records.write() {
            records.push(notification);
        }
    }

    fn list(&self, unread_only: bool) -> Vec<Notification> {
        let records = match self.records.read() {
            Ok(r) => r,
            Err(_) => return vec![],
        };

        let mut out: Vec<Notification> = records
            .iter()
            .filter(|n| !unread_only || !n.is_read)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    fn mark_read(&self, id: Uuid) -> bool {
        let Ok(mut records) = self.records.write() else {
            return false;
        };

        match records.iter_mut().find(|n| n.id == id) {
            Some(record) => {
                record.is_read = true;
                true
            }
            None => false,
        }
    }

    fn unread_count(&self) -> usize {
        self.records
            .read()
            .map(|r| r.iter().filter(|n| !n.is_read).count())
            .unwrap_or(0)
    }
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize fact payload: {0}")]
    Deserialize(String),
}

/// Materializes notification records from the fact stream.
pub struct NotificationProjection<S> {
    store: S,
    seen: Mutex<HashSet<Uuid>>,
}

impl<S> NotificationProjection<S>
where
    S: NotificationStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one published message. Duplicates (by `event_id`) are ignored;
    /// unknown topics are ignored too, since the bus carries facts for more
    /// consumers than this one.
    pub fn apply_message(&self, message: &EventMessage) -> Result<(), ProjectionError> {
        {
            let mut seen = self
                .seen
                .lock()
                .map_err(|_| ProjectionError::Deserialize("seen-set lock poisoned".to_string()))?;
            if !seen.insert(message.event_id) {
                return Ok(());
            }
        }

        let notification = match message.topic.as_str() {
            topics::EQUIPMENT_CREATED => {
                let fact: EquipmentCreated = decode(&message.payload)?;
                Some(Notification {
                    id: Uuid::now_v7(),
                    user_id: BROADCAST_USER.to_string(),
                    severity: NotificationSeverity::Info,
                    message: format!("New equipment registered: {}", fact.name),
                    related_to: Some(fact.item_id.to_string()),
                    is_read: false,
                    created_at: message.occurred_at,
                })
            }
            topics::TRANSACTION_COMMITTED => {
                let fact: TransactionCommitted = decode(&message.payload)?;
                let (severity, text) = match fact.new_status {
                    ItemStatus::Unavailable => (
                        NotificationSeverity::Warning,
                        format!("Stock exhausted after {} of {}", fact.kind, fact.quantity),
                    ),
                    ItemStatus::Low => (
                        NotificationSeverity::Warning,
                        format!(
                            "Stock running low: {} left after {}",
                            fact.new_quantity, fact.kind
                        ),
                    ),
                    ItemStatus::Available => (
                        NotificationSeverity::Info,
                        format!("Movement recorded: {} of {}", fact.kind, fact.quantity),
                    ),
                };
                Some(Notification {
                    id: Uuid::now_v7(),
                    user_id: BROADCAST_USER.to_string(),
                    severity,
                    message: text,
                    related_to: Some(fact.item_id.to_string()),
                    is_read: false,
                    created_at: message.occurred_at,
                })
            }
            topics::DOCUMENTATION_REQUIRED | topics::LEGACY_INVOICE_REQUIRED => {
                let fact: DocumentationRequired = decode(&message.payload)?;
                Some(Notification {
                    id: Uuid::now_v7(),
                    user_id: BROADCAST_USER.to_string(),
                    severity: NotificationSeverity::Warning,
                    message: format!("Paperwork required for {} movement", fact.kind),
                    related_to: Some(fact.entry_id.to_string()),
                    is_read: false,
                    created_at: message.occurred_at,
                })
            }
            _ => None,
        };

        if let Some(notification) = notification {
            self.store.append(notification);
        }

        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    payload: &serde_json::Value,
) -> Result<T, ProjectionError> {
    serde_json::from_value(payload.clone()).map_err(|e| ProjectionError::Deserialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use equiptrack_core::{ItemId, LedgerEntryId};
    use equiptrack_events::DomainEvent;
    use equiptrack_warehouse::MovementKind;

    fn committed_fact(new_quantity: i64, new_status: ItemStatus) -> EventMessage {
        let fact = DomainEvent::TransactionCommitted(TransactionCommitted {
            entry_id: LedgerEntryId::new(),
            item_id: ItemId::new(),
            kind: MovementKind::Issue,
            quantity: 2,
            quantity_delta: -2,
            new_quantity,
            new_status,
            recorded_at: Utc::now(),
        });
        EventMessage::from_event(&fact).unwrap()
    }

    #[test]
    fn low_stock_becomes_a_warning() {
        let projection = NotificationProjection::new(InMemoryNotificationStore::new());

        projection
            .apply_message(&committed_fact(1, ItemStatus::Low))
            .unwrap();

        let records = projection.store().list(true);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, NotificationSeverity::Warning);
        assert_eq!(records[0].user_id, BROADCAST_USER);
    }

    #[test]
    fn duplicate_delivery_is_a_no_op() {
        let projection = NotificationProjection::new(InMemoryNotificationStore::new());
        let message = committed_fact(5, ItemStatus::Available);

        projection.apply_message(&message).unwrap();
        projection.apply_message(&message).unwrap();

        assert_eq!(projection.store().list(false).len(), 1);
    }

    #[test]
    fn unknown_topics_are_ignored() {
        let projection = NotificationProjection::new(InMemoryNotificationStore::new());
        let message = EventMessage {
            event_id: Uuid::now_v7(),
            topic: "maintenance.scheduled".to_string(),
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        };

        projection.apply_message(&message).unwrap();

        assert!(projection.store().list(false).is_empty());
    }

    #[test]
    fn mark_read_clears_the_unread_count() {
        let projection = NotificationProjection::new(InMemoryNotificationStore::new());
        projection
            .apply_message(&committed_fact(0, ItemStatus::Unavailable))
            .unwrap();

        let records = projection.store().list(true);
        assert_eq!(projection.store().unread_count(), 1);
        assert!(projection.store().mark_read(records[0].id));
        assert_eq!(projection.store().unread_count(), 0);
        assert!(!projection.store().mark_read(Uuid::now_v7()));
    }
}
