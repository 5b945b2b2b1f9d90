//! `batchledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger crates
//! (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{LedgerError, LedgerResult};
pub use id::{BatchId, LocationId, ReservationId, SkuRef, TransferId};
pub use value_object::ValueObject;
