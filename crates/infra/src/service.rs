//! Application facade over the coordinator, stores and paperwork probe.
//!
//! This is the surface a thin API layer binds to: registration and movement
//! commits delegate to the coordinator; reads, archival and the
//! paperwork-gap report live here. Reads never take the per-item commit
//! lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use equiptrack_core::{ItemId, LedgerEntryId};
use equiptrack_warehouse::{derive_status, ItemDraft, LedgerEntry, Movement, StockRecord};

use crate::coordinator::{CommitError, CommitReceipt, TransactionCoordinator};
use crate::publisher::EventPublisher;
use crate::reconciliation::{PaperworkProbe, ReconciliationChecker, ReconciliationConfig};
use crate::store::{ItemFilter, LedgerFilter, StoreError, WarehouseStore};

/// Metadata-only update; quantity and status belong to the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ItemDetailsUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub unit_price: Option<u64>,
    pub min_quantity: Option<i64>,
    pub location: Option<String>,
    pub purchase_date: Option<DateTime<Utc>>,
    pub warranty_expiry: Option<DateTime<Utc>>,
}

pub struct WarehouseService<S> {
    coordinator: TransactionCoordinator<S>,
    store: Arc<S>,
    probe: Arc<dyn PaperworkProbe>,
}

impl<S> WarehouseService<S>
where
    S: WarehouseStore,
{
    pub fn new(
        store: Arc<S>,
        publisher: EventPublisher,
        probe: Arc<dyn PaperworkProbe>,
        reconciliation: ReconciliationConfig,
    ) -> Self {
        let checker =
            ReconciliationChecker::new(Arc::clone(&probe), publisher.clone(), reconciliation);
        let coordinator = TransactionCoordinator::new(Arc::clone(&store), publisher, checker);
        Self {
            coordinator,
            store,
            probe,
        }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator<S> {
        &self.coordinator
    }

    /// Register an item: stock record + initial intake entry + fact.
    pub fn register_item(
        &self,
        draft: ItemDraft,
        actor: impl Into<String>,
    ) -> Result<StockRecord, CommitError> {
        self.coordinator.register_item(draft, actor)
    }

    /// Commit a stock movement.
    pub fn record_movement(&self, movement: Movement) -> Result<CommitReceipt, CommitError> {
        self.coordinator.record_movement(movement)
    }

    pub fn item(&self, id: ItemId) -> Result<StockRecord, CommitError> {
        self.store
            .item(id)
            .map_err(read_error)?
            .ok_or(CommitError::NotFound)
    }

    pub fn list_items(&self, filter: &ItemFilter) -> Result<Vec<StockRecord>, CommitError> {
        self.store.list_items(filter).map_err(read_error)
    }

    /// Update descriptive metadata. Changing `min_quantity` re-derives the
    /// status with the shared rule, same as the coordinator does on commit.
    pub fn update_item_details(
        &self,
        id: ItemId,
        update: ItemDetailsUpdate,
    ) -> Result<StockRecord, CommitError> {
        let mut record = self.item(id)?;

        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(category) = update.category {
            record.category = category;
        }
        if let Some(description) = update.description {
            record.description = description;
        }
        if let Some(manufacturer) = update.manufacturer {
            record.manufacturer = manufacturer;
        }
        if let Some(unit_price) = update.unit_price {
            record.unit_price = unit_price;
        }
        if let Some(location) = update.location {
            record.location = location;
        }
        if let Some(purchase_date) = update.purchase_date {
            record.purchase_date = Some(purchase_date);
        }
        if let Some(warranty_expiry) = update.warranty_expiry {
            record.warranty_expiry = Some(warranty_expiry);
        }
        if let Some(min_quantity) = update.min_quantity {
            record.min_quantity = min_quantity;
            record.status = derive_status(record.quantity, record.min_quantity);
        }
        record.updated_at = Utc::now();

        if !self.store.update_item(&record).map_err(read_error)? {
            return Err(CommitError::NotFound);
        }
        Ok(record)
    }

    /// Hard delete, rejected while ledger entries reference the item.
    /// Archival is the supported alternative.
    pub fn delete_item(&self, id: ItemId) -> Result<(), CommitError> {
        let referencing = self.store.entry_count_for_item(id).map_err(read_error)?;
        if referencing > 0 {
            return Err(CommitError::Conflict(format!(
                "item has {referencing} ledger entries; archive it instead"
            )));
        }

        if !self.store.delete_item(id).map_err(read_error)? {
            return Err(CommitError::NotFound);
        }
        info!(item_id = %id, "item deleted");
        Ok(())
    }

    /// Archive an item: it keeps its ledger history but rejects movements.
    pub fn archive_item(&self, id: ItemId) -> Result<StockRecord, CommitError> {
        let mut record = self.item(id)?;
        record.archived = true;
        record.updated_at = Utc::now();

        if !self.store.update_item(&record).map_err(read_error)? {
            return Err(CommitError::NotFound);
        }
        info!(item_id = %id, "item archived");
        Ok(record)
    }

    pub fn entry(&self, id: LedgerEntryId) -> Result<LedgerEntry, CommitError> {
        self.store
            .entry(id)
            .map_err(read_error)?
            .ok_or(CommitError::NotFound)
    }

    pub fn list_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, CommitError> {
        self.store.list_entries(filter).map_err(read_error)
    }

    /// Full movement history for one item, chronological.
    pub fn item_history(&self, item_id: ItemId) -> Result<Vec<LedgerEntry>, CommitError> {
        self.store.item_history(item_id).map_err(read_error)
    }

    /// Ledger entries with no paperwork record. Probe failures skip the
    /// entry (logged) rather than failing the whole report.
    pub fn entries_without_paperwork(&self) -> Result<Vec<LedgerEntry>, CommitError> {
        let all = self
            .store
            .list_entries(&LedgerFilter {
                limit: None,
                ..Default::default()
            })
            .map_err(read_error)?;

        let mut missing = Vec::new();
        for entry in all {
            match self.probe.has_document(entry.id) {
                Ok(true) => {}
                Ok(false) => missing.push(entry),
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "paperwork probe failed, skipping entry");
                }
            }
        }
        Ok(missing)
    }
}

fn read_error(err: StoreError) -> CommitError {
    CommitError::StorageUnavailable(err.to_string())
}
