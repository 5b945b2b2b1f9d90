//! Batch ledger domain module.
//!
//! This crate contains the business rules for lot-tracked inventory,
//! implemented purely as deterministic domain logic (no IO, no storage).
//! Services in `batchledger-infra` load batches, call into these functions
//! and commit the result atomically.

pub mod allocation;
pub mod batch;
pub mod batch_manager;
pub mod events;
pub mod ledger;
pub mod reservation;
pub mod strategy;
pub mod transfer;

pub use allocation::{AllocationPlan, Contribution};
pub use batch::{Batch, BatchRecord, BatchStatus, COST_SCALE, NewBatch};
pub use events::{BatchChanged, ReservationChanged, StockEvent, StockMoved, TransferChanged};
pub use ledger::{BatchMovement, LedgerOperation, OperationKind};
pub use reservation::{ReservationStatus, ReservationType, StockReservation};
pub use strategy::{AllocationStrategy, Fefo, Fifo, Lifo, StrategyRegistry};
pub use transfer::{StockTransfer, TransferItem, TransferStatus};
