//! Ledger persistence boundary.
//!
//! Services never write to a store directly: they stage changes in a
//! [`Transaction`] and commit the resulting [`ChangeSet`] in one call.

pub mod in_memory;
pub mod r#trait;
pub mod transaction;

pub use in_memory::InMemoryLedgerStore;
pub use r#trait::{BatchCriteria, ChangeSet, LedgerStore, ReservationCriteria, StoreError};
pub use transaction::Transaction;
