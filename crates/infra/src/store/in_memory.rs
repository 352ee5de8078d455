//! In-memory warehouse store.
//!
//! Intended for tests/dev. Both collections live under one `RwLock`, so the
//! commit operations are a single critical section and therefore atomic.

use std::collections::HashMap;
use std::sync::RwLock;

use equiptrack_core::{ItemId, LedgerEntryId};
use equiptrack_warehouse::{LedgerEntry, StockRecord};

use super::{ItemFilter, LedgerFilter, LedgerStore, StockStore, StoreError, WarehouseStore};

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<ItemId, StockRecord>,
    entries: Vec<LedgerEntry>,
}

#[derive(Debug, Default)]
pub struct InMemoryWarehouseStore {
    inner: RwLock<Inner>,
}

impl InMemoryWarehouseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Internal("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Internal("lock poisoned".to_string()))
    }
}

impl StockStore for InMemoryWarehouseStore {
    fn item(&self, id: ItemId) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.read()?.items.get(&id).cloned())
    }

    fn update_item(&self, record: &StockRecord) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        match inner.items.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_item(&self, id: ItemId) -> Result<bool, StoreError> {
        Ok(self.write()?.items.remove(&id).is_some())
    }

    fn list_items(&self, filter: &ItemFilter) -> Result<Vec<StockRecord>, StoreError> {
        let inner = self.read()?;
        let mut items: Vec<StockRecord> = inner
            .items
            .values()
            .filter(|r| filter.include_archived || !r.archived)
            .filter(|r| filter.category.as_deref().is_none_or(|c| r.category == c))
            .filter(|r| filter.location.as_deref().is_none_or(|l| r.location == l))
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(paginate(items, filter.offset, filter.limit))
    }
}

impl LedgerStore for InMemoryWarehouseStore {
    fn entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.read()?.entries.iter().find(|e| e.id == id).cloned())
    }

    fn list_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.read()?;
        let mut entries: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| filter.kind.is_none_or(|k| e.kind == k))
            .filter(|e| filter.actor.as_deref().is_none_or(|a| e.actor == a))
            .filter(|e| filter.from.is_none_or(|t| e.recorded_at >= t))
            .filter(|e| filter.to.is_none_or(|t| e.recorded_at <= t))
            .cloned()
            .collect();

        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));

        Ok(paginate(entries, filter.offset, filter.limit))
    }

    fn item_history(&self, item_id: ItemId) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.read()?;
        let mut entries: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| e.item_id == item_id)
            .cloned()
            .collect();

        entries.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));

        Ok(entries)
    }

    fn entry_count_for_item(&self, item_id: ItemId) -> Result<u64, StoreError> {
        let inner = self.read()?;
        Ok(inner.entries.iter().filter(|e| e.item_id == item_id).count() as u64)
    }
}

impl WarehouseStore for InMemoryWarehouseStore {
    fn commit_movement(&self, record: &StockRecord, entry: &LedgerEntry) -> Result<(), StoreError> {
        let mut inner = self.write()?;

        // The coordinator loaded this record under the per-item lock; a miss
        // here means the store was tampered with outside a commit.
        let Some(existing) = inner.items.get_mut(&record.id) else {
            return Err(StoreError::Internal(format!(
                "commit target {} not found",
                record.id
            )));
        };

        *existing = record.clone();
        inner.entries.push(entry.clone());

        Ok(())
    }

    fn commit_registration(
        &self,
        record: &StockRecord,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        let mut inner = self.write()?;

        if inner.items.contains_key(&record.id) {
            return Err(StoreError::Duplicate(format!("item {}", record.id)));
        }

        inner.items.insert(record.id, record.clone());
        inner.entries.push(entry.clone());

        Ok(())
    }
}

fn paginate<T>(values: Vec<T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    values
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
