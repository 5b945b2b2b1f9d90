//! Strategy-driven allocation: planning, and planning plus execution.

use chrono::Utc;

use batchledger_core::{LedgerResult, LocationId, SkuRef};
use batchledger_inventory::allocation::{plan_allocation, select_candidates};
use batchledger_inventory::{AllocationPlan, AllocationStrategy, BatchMovement, StockEvent, StockMoved};

use crate::services::context::LedgerContext;
use crate::store::{BatchCriteria, Transaction};

#[derive(Debug, Clone)]
pub struct AllocationEngine {
    ctx: LedgerContext,
}

impl AllocationEngine {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Plan `quantity` units of `sku` without touching any batch.
    ///
    /// `strategy` defaults to the configured strategy; `location` restricts
    /// candidates to one location.
    pub fn calculate_allocation(
        &self,
        sku: &SkuRef,
        quantity: i64,
        strategy: Option<&str>,
        location: Option<&LocationId>,
    ) -> LedgerResult<AllocationPlan> {
        let strategy = self.ctx.strategy(strategy)?;
        let batches = self.ctx.store().find_available_by_sku(sku)?;
        let candidates = select_candidates(sku, &batches, location);
        let plan = plan_allocation(sku, quantity, strategy.as_ref(), &candidates)?;
        tracing::debug!(
            sku = %sku,
            quantity,
            strategy = strategy.name(),
            batches = plan.contributions.len(),
            "allocation planned"
        );
        Ok(plan)
    }

    /// Plan and execute in one transaction: every contributing batch loses
    /// its share from both `available_quantity` and `quantity`.
    pub fn allocate(
        &self,
        sku: &SkuRef,
        quantity: i64,
        strategy: Option<&str>,
        location: Option<&LocationId>,
    ) -> LedgerResult<AllocationPlan> {
        let strategy = self.ctx.strategy(strategy)?;
        let plan = self.ctx.transact("allocate", |tx| {
            let plan = plan_in(tx, sku, quantity, strategy.as_ref(), location)?;

            let mut movements = Vec::with_capacity(plan.contributions.len());
            for c in &plan.contributions {
                let mut batch = tx.batch(c.batch_id)?;
                batch.consume_available(c.quantity)?;
                movements.push(BatchMovement::of(&batch, c.quantity));
                tx.save_batch(batch)?;
            }

            tx.record(StockEvent::Allocated(StockMoved {
                sku: sku.clone(),
                kind: None,
                quantity,
                reference: None,
                movements,
                total_cost: Some(plan.total_cost()),
                occurred_at: Utc::now(),
            }));
            Ok(plan)
        })?;

        tracing::info!(
            sku = %sku,
            quantity,
            strategy = %plan.strategy,
            batches = plan.contributions.len(),
            total_cost = %plan.total_cost(),
            "stock allocated"
        );
        Ok(plan)
    }
}

/// Plan against the transaction's view of `sku`'s allocatable batches.
pub(crate) fn plan_in(
    tx: &mut Transaction<'_>,
    sku: &SkuRef,
    quantity: i64,
    strategy: &dyn AllocationStrategy,
    location: Option<&LocationId>,
) -> LedgerResult<AllocationPlan> {
    let batches = tx.batches(&BatchCriteria::for_sku(sku.clone()).available_only())?;
    let candidates = select_candidates(sku, &batches, location);
    plan_allocation(sku, quantity, strategy, &candidates)
}
