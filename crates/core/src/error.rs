//! Ledger error model.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type used across the ledger crates.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Every failure a caller can branch on is a variant here. Counter-invariant
/// violations discovered after a mutation are programming errors and panic
/// instead; they never surface through this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Not enough allocatable stock for the request.
    #[error("insufficient stock for sku {sku}: required {required}, available {available}")]
    InsufficientStock {
        sku: String,
        required: i64,
        available: i64,
    },

    /// Malformed caller input (non-positive quantity, unknown strategy, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A business rule rejected the operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An adjustment would drive a counter negative.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Unrecognized batch status string.
    #[error("invalid batch status: {0}")]
    InvalidStatus(String),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("duplicate batch number: {0}")]
    DuplicateBatchNo(String),

    #[error("reservation {id} expired at {expires_at}")]
    ReservationExpired {
        id: String,
        expires_at: DateTime<Utc>,
    },

    #[error("reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("transfer not found: {0}")]
    TransferNotFound(String),

    #[error("duplicate transfer number: {0}")]
    DuplicateTransferNo(String),

    /// Optimistic concurrency check failed after all retries.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The persistence boundary failed for a reason unrelated to the ledger.
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn insufficient(sku: impl Into<String>, required: i64, available: i64) -> Self {
        Self::InsufficientStock {
            sku: sku.into(),
            required,
            available,
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// True when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortfall_message_carries_both_quantities() {
        let err = LedgerError::insufficient("SKU-1", 200, 100);
        let msg = err.to_string();
        assert!(msg.contains("required 200"));
        assert!(msg.contains("available 100"));
        assert!(msg.contains("SKU-1"));
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(LedgerError::conflict("stale").is_retryable());
        assert!(!LedgerError::invalid_argument("qty").is_retryable());
        assert!(!LedgerError::insufficient("S", 1, 0).is_retryable());
    }
}
