//! Movement kinds and the movement request shape.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use equiptrack_core::{DomainError, DomainResult, ItemId};

/// Kind of a stock movement. The kind determines the sign of the ledger
/// delta: intake and return add stock, issue and adjustment remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Intake,
    Issue,
    Return,
    Adjustment,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Intake => "intake",
            MovementKind::Issue => "issue",
            MovementKind::Return => "return",
            MovementKind::Adjustment => "adjustment",
        }
    }

    /// True for kinds that take stock out of the warehouse.
    pub fn is_outbound(&self) -> bool {
        matches!(self, MovementKind::Issue | MovementKind::Adjustment)
    }

    /// Signed ledger delta for a (positive) movement quantity.
    pub fn signed_delta(&self, quantity: i64) -> i64 {
        if self.is_outbound() { -quantity } else { quantity }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intake" => Ok(MovementKind::Intake),
            "issue" => Ok(MovementKind::Issue),
            "return" => Ok(MovementKind::Return),
            "adjustment" => Ok(MovementKind::Adjustment),
            other => Err(DomainError::invalid_kind(other)),
        }
    }
}

/// A requested stock movement, before it has been committed.
///
/// `counterpart` names the destination party for issues/transfers; `reason`
/// and `notes` are free text carried into the ledger entry verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub item_id: ItemId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub actor: String,
    pub counterpart: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl Movement {
    pub fn new(item_id: ItemId, kind: MovementKind, quantity: i64, actor: impl Into<String>) -> Self {
        Self {
            item_id,
            kind,
            quantity,
            actor: actor.into(),
            counterpart: None,
            reason: None,
            notes: None,
        }
    }

    pub fn with_counterpart(mut self, counterpart: impl Into<String>) -> Self {
        self.counterpart = Some(counterpart.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Request-shape validation; stock sufficiency is re-checked by the
    /// coordinator inside the commit critical section.
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if self.actor.trim().is_empty() {
            return Err(DomainError::validation("actor cannot be empty"));
        }
        Ok(())
    }
}
