//! Durable stores for stock records and the movement ledger.
//!
//! The trait split mirrors ownership: stock state is mutable (coordinator
//! only), the ledger is append-only. Appends never happen on their own —
//! they enter through the atomic commit operations on [`WarehouseStore`],
//! which couple the ledger insert with the stock update so the ledger-sum
//! invariant can never be observed broken.

use chrono::{DateTime, Utc};
use thiserror::Error;

use equiptrack_core::{ItemId, LedgerEntryId};
use equiptrack_warehouse::{ItemStatus, LedgerEntry, MovementKind, StockRecord};

mod in_memory;
mod postgres;

pub use in_memory::InMemoryWarehouseStore;
pub use postgres::PostgresWarehouseStore;

/// Storage-level error.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Transient backend failure. The coordinator retries these with backoff
    /// before surfacing a fatal error.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint was violated (e.g. re-inserting an item id).
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Non-transient backend failure; not retried.
    #[error("storage error: {0}")]
    Internal(String),
}

/// Filter for stock record listings.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub category: Option<String>,
    pub location: Option<String>,
    pub status: Option<ItemStatus>,
    pub include_archived: bool,
    /// `None` means no limit.
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Filter for ledger listings (newest first).
#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub kind: Option<MovementKind>,
    pub actor: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// `None` means no limit.
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Current-state store, keyed by item identity.
pub trait StockStore: Send + Sync {
    fn item(&self, id: ItemId) -> Result<Option<StockRecord>, StoreError>;

    /// Update descriptive metadata / archival flag. Returns false when the
    /// item does not exist. Quantity and status changes go through
    /// [`WarehouseStore::commit_movement`] only.
    fn update_item(&self, record: &StockRecord) -> Result<bool, StoreError>;

    /// Hard delete; the service layer guards this with a ledger-reference
    /// check. Returns false when the item does not exist.
    fn delete_item(&self, id: ItemId) -> Result<bool, StoreError>;

    /// Newest-registered first.
    fn list_items(&self, filter: &ItemFilter) -> Result<Vec<StockRecord>, StoreError>;
}

/// Append-only ledger, keyed by entry identity with secondary access paths
/// by item and by timestamp.
pub trait LedgerStore: Send + Sync {
    fn entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError>;

    /// Newest first, timestamp index.
    fn list_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError>;

    /// All entries for one item, chronological.
    fn item_history(&self, item_id: ItemId) -> Result<Vec<LedgerEntry>, StoreError>;

    fn entry_count_for_item(&self, item_id: ItemId) -> Result<u64, StoreError>;
}

/// The combined store with the two atomic commit operations.
pub trait WarehouseStore: StockStore + LedgerStore {
    /// Apply a stock update and append its ledger entry as one atomic unit.
    /// Either both persist or neither does.
    fn commit_movement(&self, record: &StockRecord, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// Insert a new record together with its initial intake entry, atomically.
    fn commit_registration(
        &self,
        record: &StockRecord,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError>;
}
