//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, stock rules, conflicts).
/// Storage and broker concerns live in the infrastructure layer. Each variant
/// is a distinct category so callers can tell "fix the request" apart from
/// "the item state disagrees with you".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive quantity, empty actor).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A movement kind label was not one of intake/issue/return/adjustment.
    #[error("invalid movement kind: {0}")]
    InvalidKind(String),

    /// An outbound movement asked for more than the item currently holds.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { available: i64, requested: i64 },

    /// The referenced item does not exist (or is archived).
    #[error("not found")]
    NotFound,

    /// The operation conflicts with existing state (e.g. deleting an item
    /// that ledger entries still reference).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_kind(label: impl Into<String>) -> Self {
        Self::InvalidKind(label.into())
    }

    pub fn insufficient_stock(available: i64, requested: i64) -> Self {
        Self::InsufficientStock {
            available,
            requested,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
