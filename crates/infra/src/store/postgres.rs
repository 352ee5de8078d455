//! Postgres-backed warehouse store.
//!
//! Persists stock records and the movement ledger in PostgreSQL. The two
//! commit operations run inside a database transaction, which is what makes
//! the ledger insert + stock update a single atomic unit for this backend
//! (the in-memory backend uses one lock instead).
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE stock_records (
//!     id              UUID PRIMARY KEY,
//!     name            TEXT NOT NULL,
//!     serial_number   TEXT NOT NULL,
//!     category        TEXT NOT NULL,
//!     description     TEXT NOT NULL DEFAULT '',
//!     manufacturer    TEXT NOT NULL DEFAULT '',
//!     unit_price      BIGINT NOT NULL DEFAULT 0,
//!     quantity        BIGINT NOT NULL CHECK (quantity >= 0),
//!     min_quantity    BIGINT NOT NULL CHECK (min_quantity >= 0),
//!     location        TEXT NOT NULL,
//!     purchase_date   TIMESTAMPTZ,
//!     warranty_expiry TIMESTAMPTZ,
//!     status          TEXT NOT NULL,
//!     archived        BOOLEAN NOT NULL DEFAULT FALSE,
//!     created_at      TIMESTAMPTZ NOT NULL,
//!     updated_at      TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE ledger_entries (
//!     id             UUID PRIMARY KEY,
//!     item_id        UUID NOT NULL REFERENCES stock_records (id),
//!     kind           TEXT NOT NULL,
//!     quantity_delta BIGINT NOT NULL,
//!     actor          TEXT NOT NULL,
//!     counterpart    TEXT,
//!     reason         TEXT,
//!     notes          TEXT,
//!     recorded_at    TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX ledger_entries_item_idx ON ledger_entries (item_id);
//! CREATE INDEX ledger_entries_recorded_idx ON ledger_entries (recorded_at);
//! ```
//!
//! ## Error mapping
//!
//! | SQLx error | Code | StoreError |
//! |------------|------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Io / pool closed / pool timeout | — | `Unavailable` (retried by the coordinator) |
//! | anything else | — | `Internal` |

use std::str::FromStr;
use std::sync::Arc;

use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use equiptrack_core::{ItemId, LedgerEntryId};
use equiptrack_warehouse::{ItemStatus, LedgerEntry, MovementKind, StockRecord};

use super::{ItemFilter, LedgerFilter, LedgerStore, StockStore, StoreError, WarehouseStore};

/// Postgres-backed store. `Send + Sync`; all operations go through the SQLx
/// connection pool. The sync store traits are bridged onto the async
/// implementation via the ambient tokio runtime handle.
#[derive(Debug, Clone)]
pub struct PostgresWarehouseStore {
    pool: Arc<PgPool>,
}

impl PostgresWarehouseStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    pub async fn fetch_item(&self, id: ItemId) -> Result<Option<StockRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_item", e))?;

        row.map(|r| stock_record_from_row(&r)).transpose()
    }

    #[instrument(skip(self, record), fields(item_id = %record.id), err)]
    pub async fn store_item(&self, record: &StockRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE stock_records SET
                name = $2, serial_number = $3, category = $4, description = $5,
                manufacturer = $6, unit_price = $7, quantity = $8, min_quantity = $9,
                location = $10, purchase_date = $11, warranty_expiry = $12,
                status = $13, archived = $14, updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.name)
        .bind(&record.serial_number)
        .bind(&record.category)
        .bind(&record.description)
        .bind(&record.manufacturer)
        .bind(record.unit_price as i64)
        .bind(record.quantity)
        .bind(record.min_quantity)
        .bind(&record.location)
        .bind(record.purchase_date)
        .bind(record.warranty_expiry)
        .bind(record.status.as_str())
        .bind(record.archived)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("store_item", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    pub async fn remove_item(&self, id: ItemId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM stock_records WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_item", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn query_items(&self, filter: &ItemFilter) -> Result<Vec<StockRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {STOCK_COLUMNS} FROM stock_records
            WHERE ($1::text IS NULL OR category = $1)
                AND ($2::text IS NULL OR location = $2)
                AND ($3::text IS NULL OR status = $3)
                AND ($4::boolean OR NOT archived)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(filter.category.as_deref())
        .bind(filter.location.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.include_archived)
        .bind(limit_or_all(filter.limit))
        .bind(filter.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_items", e))?;

        rows.iter().map(stock_record_from_row).collect()
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    pub async fn fetch_entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_entry", e))?;

        row.map(|r| ledger_entry_from_row(&r)).transpose()
    }

    #[instrument(skip(self, filter), err)]
    pub async fn query_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LEDGER_COLUMNS} FROM ledger_entries
            WHERE ($1::text IS NULL OR kind = $1)
                AND ($2::text IS NULL OR actor = $2)
                AND ($3::timestamptz IS NULL OR recorded_at >= $3)
                AND ($4::timestamptz IS NULL OR recorded_at <= $4)
            ORDER BY recorded_at DESC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.actor.as_deref())
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit_or_all(filter.limit))
        .bind(filter.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_entries", e))?;

        rows.iter().map(ledger_entry_from_row).collect()
    }

    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub async fn query_item_history(&self, item_id: ItemId) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LEDGER_COLUMNS} FROM ledger_entries
            WHERE item_id = $1
            ORDER BY recorded_at ASC
            "#
        ))
        .bind(item_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_item_history", e))?;

        rows.iter().map(ledger_entry_from_row).collect()
    }

    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub async fn count_entries(&self, item_id: ItemId) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM ledger_entries WHERE item_id = $1")
            .bind(item_id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_entries", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::Internal(format!("failed to read count: {e}")))?;

        Ok(total as u64)
    }

    /// Stock update + ledger append in one SQL transaction.
    #[instrument(skip(self, record, entry), fields(item_id = %record.id, entry_id = %entry.id), err)]
    pub async fn apply_movement(
        &self,
        record: &StockRecord,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE stock_records
            SET quantity = $2, status = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.quantity)
        .bind(record.status.as_str())
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_stock", e))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Internal(format!(
                "commit target {} not found",
                record.id
            )));
        }

        insert_entry(&mut tx, entry).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    /// New record + initial intake entry in one SQL transaction.
    #[instrument(skip(self, record, entry), fields(item_id = %record.id), err)]
    pub async fn apply_registration(
        &self,
        record: &StockRecord,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO stock_records (
                id, name, serial_number, category, description, manufacturer,
                unit_price, quantity, min_quantity, location, purchase_date,
                warranty_expiry, status, archived, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.name)
        .bind(&record.serial_number)
        .bind(&record.category)
        .bind(&record.description)
        .bind(&record.manufacturer)
        .bind(record.unit_price as i64)
        .bind(record.quantity)
        .bind(record.min_quantity)
        .bind(&record.location)
        .bind(record.purchase_date)
        .bind(record.warranty_expiry)
        .bind(record.status.as_str())
        .bind(record.archived)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_stock", e))?;

        insert_entry(&mut tx, entry).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &LedgerEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            id, item_id, kind, quantity_delta, actor, counterpart, reason,
            notes, recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.item_id.as_uuid())
    .bind(entry.kind.as_str())
    .bind(entry.quantity_delta)
    .bind(&entry.actor)
    .bind(entry.counterpart.as_deref())
    .bind(entry.reason.as_deref())
    .bind(entry.notes.as_deref())
    .bind(entry.recorded_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_entry", e))?;

    Ok(())
}

const STOCK_COLUMNS: &str = "id, name, serial_number, category, description, manufacturer, \
     unit_price, quantity, min_quantity, location, purchase_date, warranty_expiry, \
     status, archived, created_at, updated_at";

const LEDGER_COLUMNS: &str =
    "id, item_id, kind, quantity_delta, actor, counterpart, reason, notes, recorded_at";

fn limit_or_all(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(i64::MAX)
}

fn stock_record_from_row(row: &sqlx::postgres::PgRow) -> Result<StockRecord, StoreError> {
    let get_err = |e: sqlx::Error| StoreError::Internal(format!("bad stock row: {e}"));

    let status: String = row.try_get("status").map_err(get_err)?;
    let unit_price: i64 = row.try_get("unit_price").map_err(get_err)?;

    Ok(StockRecord {
        id: ItemId::from_uuid(row.try_get("id").map_err(get_err)?),
        name: row.try_get("name").map_err(get_err)?,
        serial_number: row.try_get("serial_number").map_err(get_err)?,
        category: row.try_get("category").map_err(get_err)?,
        description: row.try_get("description").map_err(get_err)?,
        manufacturer: row.try_get("manufacturer").map_err(get_err)?,
        unit_price: unit_price.max(0) as u64,
        quantity: row.try_get("quantity").map_err(get_err)?,
        min_quantity: row.try_get("min_quantity").map_err(get_err)?,
        location: row.try_get("location").map_err(get_err)?,
        purchase_date: row.try_get("purchase_date").map_err(get_err)?,
        warranty_expiry: row.try_get("warranty_expiry").map_err(get_err)?,
        status: parse_status(&status)?,
        archived: row.try_get("archived").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
    })
}

fn ledger_entry_from_row(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry, StoreError> {
    let get_err = |e: sqlx::Error| StoreError::Internal(format!("bad ledger row: {e}"));

    let kind: String = row.try_get("kind").map_err(get_err)?;

    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(row.try_get("id").map_err(get_err)?),
        item_id: ItemId::from_uuid(row.try_get("item_id").map_err(get_err)?),
        kind: MovementKind::from_str(&kind)
            .map_err(|e| StoreError::Internal(format!("bad ledger row: {e}")))?,
        quantity_delta: row.try_get("quantity_delta").map_err(get_err)?,
        actor: row.try_get("actor").map_err(get_err)?,
        counterpart: row.try_get("counterpart").map_err(get_err)?,
        reason: row.try_get("reason").map_err(get_err)?,
        notes: row.try_get("notes").map_err(get_err)?,
        recorded_at: row.try_get("recorded_at").map_err(get_err)?,
    })
}

fn parse_status(s: &str) -> Result<ItemStatus, StoreError> {
    match s {
        "available" => Ok(ItemStatus::Available),
        "low" => Ok(ItemStatus::Low),
        "unavailable" => Ok(ItemStatus::Unavailable),
        other => Err(StoreError::Internal(format!("unknown status '{other}'"))),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Internal(msg),
            }
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        other => StoreError::Internal(format!("sqlx error in {operation}: {other}")),
    }
}

// The store traits are synchronous; bridge onto the async implementation via
// the ambient tokio runtime, the same way the rest of the codebase calls this
// backend from non-async contexts.

fn runtime_handle(operation: &str) -> Result<tokio::runtime::Handle, StoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Internal(format!(
            "PostgresWarehouseStore::{operation} requires a tokio runtime context"
        ))
    })
}

impl StockStore for PostgresWarehouseStore {
    fn item(&self, id: ItemId) -> Result<Option<StockRecord>, StoreError> {
        runtime_handle("item")?.block_on(self.fetch_item(id))
    }

    fn update_item(&self, record: &StockRecord) -> Result<bool, StoreError> {
        runtime_handle("update_item")?.block_on(self.store_item(record))
    }

    fn delete_item(&self, id: ItemId) -> Result<bool, StoreError> {
        runtime_handle("delete_item")?.block_on(self.remove_item(id))
    }

    fn list_items(&self, filter: &ItemFilter) -> Result<Vec<StockRecord>, StoreError> {
        runtime_handle("list_items")?.block_on(self.query_items(filter))
    }
}

impl LedgerStore for PostgresWarehouseStore {
    fn entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        runtime_handle("entry")?.block_on(self.fetch_entry(id))
    }

    fn list_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        runtime_handle("list_entries")?.block_on(self.query_entries(filter))
    }

    fn item_history(&self, item_id: ItemId) -> Result<Vec<LedgerEntry>, StoreError> {
        runtime_handle("item_history")?.block_on(self.query_item_history(item_id))
    }

    fn entry_count_for_item(&self, item_id: ItemId) -> Result<u64, StoreError> {
        runtime_handle("entry_count_for_item")?.block_on(self.count_entries(item_id))
    }
}

impl WarehouseStore for PostgresWarehouseStore {
    fn commit_movement(&self, record: &StockRecord, entry: &LedgerEntry) -> Result<(), StoreError> {
        runtime_handle("commit_movement")?.block_on(self.apply_movement(record, entry))
    }

    fn commit_registration(
        &self,
        record: &StockRecord,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        runtime_handle("commit_registration")?.block_on(self.apply_registration(record, entry))
    }
}
