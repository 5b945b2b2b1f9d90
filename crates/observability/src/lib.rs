//! Process-wide tracing setup for ledger hosts.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{DEFAULT_FILTER, LOG_FORMAT_VAR, LogFormat};

/// Initialize process-wide tracing with the format named by
/// `BATCHLEDGER_LOG_FORMAT` (JSON unless set to `pretty`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}
