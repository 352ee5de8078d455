//! Item availability status and its derivation rule.

use serde::{Deserialize, Serialize};

/// Availability of a stock record, derived from quantity thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Available,
    Low,
    Unavailable,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::Low => "low",
            ItemStatus::Unavailable => "unavailable",
        }
    }
}

impl core::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the status for a quantity against its reorder threshold.
///
/// Single source of truth. The coordinator and any read path that re-derives
/// status from a raw quantity must call this, never re-implement the rule.
pub fn derive_status(quantity: i64, min_quantity: i64) -> ItemStatus {
    if quantity <= 0 {
        ItemStatus::Unavailable
    } else if quantity < min_quantity {
        ItemStatus::Low
    } else {
        ItemStatus::Available
    }
}
