//! Ledger services.
//!
//! Each service call is one unit of work run through
//! [`LedgerContext::transact`]: it commits entirely or not at all, and its
//! events are emitted only after the commit.

pub mod allocation_engine;
pub mod batch_service;
pub mod context;
pub mod reservation_manager;
pub mod stock_operator;
pub mod transfer_coordinator;

pub use allocation_engine::AllocationEngine;
pub use batch_service::BatchService;
pub use context::LedgerContext;
pub use reservation_manager::{ReservationManager, ReserveRequest};
pub use stock_operator::{BatchProcessReport, OperationOutcome, StockOperator};
pub use transfer_coordinator::{TransferCoordinator, TransferRequest};

/// Every service, built over one shared context.
#[derive(Debug, Clone)]
pub struct LedgerServices {
    pub allocation: AllocationEngine,
    pub operator: StockOperator,
    pub reservations: ReservationManager,
    pub transfers: TransferCoordinator,
    pub batches: BatchService,
}

impl LedgerServices {
    pub fn new(ctx: LedgerContext) -> Self {
        Self {
            allocation: AllocationEngine::new(ctx.clone()),
            operator: StockOperator::new(ctx.clone()),
            reservations: ReservationManager::new(ctx.clone()),
            transfers: TransferCoordinator::new(ctx.clone()),
            batches: BatchService::new(ctx),
        }
    }
}
