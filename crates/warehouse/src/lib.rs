//! `equiptrack-warehouse` — the pure stock-tracking domain.
//!
//! Types and decision logic only; persistence, locking and event fan-out
//! live in `equiptrack-infra`.

pub mod ledger;
pub mod movement;
pub mod record;
pub mod status;

pub use ledger::LedgerEntry;
pub use movement::{Movement, MovementKind};
pub use record::{ItemDraft, StockRecord};
pub use status::{derive_status, ItemStatus};
