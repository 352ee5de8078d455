//! Transaction coordination — the only writer of stock state.
//!
//! The coordinator applies a requested movement as one atomic unit against
//! the stock and ledger stores:
//!
//! ```text
//! Movement
//!   ↓
//! 1. Validate request shape (never retried)
//!   ↓
//! 2. Acquire the per-item lock (commits on one item are serialized;
//!    unrelated items proceed in parallel)
//!   ↓
//! 3. Load current state, re-check sufficiency inside the critical section
//!   ↓
//! 4. commit_movement(updated record, ledger entry) — atomic; transient
//!    storage failures retried with bounded backoff
//!   ↓
//! 5. Release the lock, then fire-and-forget: publish the committed fact,
//!    schedule the paperwork check
//! ```
//!
//! Step 3 is deliberately inside the lock: a sufficiency check done before
//! acquiring it could race a concurrent commit on the same item. Step 5
//! failures never roll back or retry the committed transaction — facts
//! describe state that is already durable.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use equiptrack_core::{DomainError, ItemId, LedgerEntryId};
use equiptrack_events::{DomainEvent, EquipmentCreated, TransactionCommitted};
use equiptrack_warehouse::{ItemDraft, ItemStatus, LedgerEntry, Movement, StockRecord};

use crate::publisher::EventPublisher;
use crate::reconciliation::ReconciliationChecker;
use crate::retry::RetryPolicy;
use crate::store::{StoreError, WarehouseStore};

/// Commit-path error, split into the categories a caller can act on:
/// validation and business-rule failures mean "correct and resubmit",
/// `StorageUnavailable` means "retry later".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid movement kind: {0}")]
    InvalidKind(String),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { available: i64, requested: i64 },

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage stayed down through the bounded retry window. No partial
    /// state was written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<DomainError> for CommitError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => CommitError::Validation(msg),
            DomainError::InvalidId(msg) => CommitError::Validation(msg),
            DomainError::InvalidKind(label) => CommitError::InvalidKind(label),
            DomainError::InsufficientStock {
                available,
                requested,
            } => CommitError::InsufficientStock {
                available,
                requested,
            },
            DomainError::NotFound => CommitError::NotFound,
            DomainError::Conflict(msg) => CommitError::Conflict(msg),
        }
    }
}

/// What a successful commit returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub entry_id: LedgerEntryId,
    pub new_quantity: i64,
    pub new_status: ItemStatus,
}

/// A lock an item holds while one of its commits is in flight.
///
/// Condvar-based so the guard can own the lock through an `Arc` (a
/// `MutexGuard` could not leave the table's borrow).
#[derive(Debug, Default)]
struct ItemLock {
    held: Mutex<bool>,
    wake: Condvar,
}

impl ItemLock {
    fn acquire(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.wake.wait(held).unwrap();
        }
        *held = true;
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap();
        *held = false;
        self.wake.notify_one();
    }
}

/// Per-item lock table. One slot per item ever moved; the registry mutex is
/// held only to look up or create a slot, never across a commit.
#[derive(Debug, Default)]
struct LockTable {
    locks: Mutex<HashMap<ItemId, Arc<ItemLock>>>,
}

impl LockTable {
    fn lock(&self, id: ItemId) -> ItemLockGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            Arc::clone(locks.entry(id).or_default())
        };
        lock.acquire();
        ItemLockGuard { lock }
    }
}

struct ItemLockGuard {
    lock: Arc<ItemLock>,
}

impl Drop for ItemLockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Applies movements and registrations atomically and hands committed facts
/// off to the asynchronous side effects.
pub struct TransactionCoordinator<S> {
    store: Arc<S>,
    publisher: EventPublisher,
    reconciliation: ReconciliationChecker,
    locks: LockTable,
    retry: RetryPolicy,
}

impl<S> TransactionCoordinator<S>
where
    S: WarehouseStore,
{
    pub fn new(
        store: Arc<S>,
        publisher: EventPublisher,
        reconciliation: ReconciliationChecker,
    ) -> Self {
        Self {
            store,
            publisher,
            reconciliation,
            locks: LockTable::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Commit one stock movement.
    pub fn record_movement(&self, movement: Movement) -> Result<CommitReceipt, CommitError> {
        movement.validate()?;

        let guard = self.locks.lock(movement.item_id);

        let record = self
            .store
            .item(movement.item_id)
            .map_err(load_error)?
            .ok_or(CommitError::NotFound)?;
        if record.archived {
            return Err(CommitError::NotFound);
        }

        // Sufficiency re-checked here, inside the critical section.
        let (new_quantity, new_status) = record.movement_outcome(movement.kind, movement.quantity)?;

        let now = Utc::now();
        let entry = LedgerEntry::record(&movement, now);
        let updated = record.applied(new_quantity, new_status, now);

        self.commit_with_retry(|| self.store.commit_movement(&updated, &entry))?;
        drop(guard);

        info!(
            item_id = %movement.item_id,
            entry_id = %entry.id,
            kind = %movement.kind,
            new_quantity,
            new_status = %new_status,
            "movement committed"
        );

        // Fire-and-forget side effects; neither can fail the commit.
        self.publisher
            .publish(DomainEvent::TransactionCommitted(
                TransactionCommitted::from_commit(&entry, new_quantity, new_status),
            ));
        self.reconciliation.schedule(entry.id, movement.kind);

        Ok(CommitReceipt {
            entry_id: entry.id,
            new_quantity,
            new_status,
        })
    }

    /// Register a new item: stock record plus its initial intake entry, as
    /// one atomic unit.
    pub fn register_item(
        &self,
        draft: ItemDraft,
        actor: impl Into<String>,
    ) -> Result<StockRecord, CommitError> {
        draft.validate()?;

        let now = Utc::now();
        let record = StockRecord::register(ItemId::new(), draft, now);
        let entry = LedgerEntry::initial_intake(record.id, record.quantity, actor, now);

        // The id is freshly minted, so nothing can race this commit and no
        // per-item lock is needed.
        self.commit_with_retry(|| self.store.commit_registration(&record, &entry))?;

        info!(
            item_id = %record.id,
            quantity = record.quantity,
            status = %record.status,
            "item registered"
        );

        self.publisher
            .publish(DomainEvent::EquipmentCreated(EquipmentCreated::from_record(
                &record,
            )));

        Ok(record)
    }

    fn commit_with_retry(
        &self,
        op: impl Fn() -> Result<(), StoreError>,
    ) -> Result<(), CommitError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op() {
                Ok(()) => return Ok(()),
                Err(StoreError::Unavailable(msg)) if self.retry.should_retry(attempt) => {
                    warn!(attempt, error = %msg, "atomic commit failed, backing off");
                    thread::sleep(self.retry.delay_for_attempt(attempt));
                }
                Err(StoreError::Unavailable(msg)) => {
                    return Err(CommitError::StorageUnavailable(msg));
                }
                Err(StoreError::Duplicate(msg)) => return Err(CommitError::Conflict(msg)),
                Err(StoreError::Internal(msg)) => {
                    return Err(CommitError::StorageUnavailable(msg));
                }
            }
        }
    }
}

fn load_error(err: StoreError) -> CommitError {
    CommitError::StorageUnavailable(err.to_string())
}
