//! Ledger operations (lock, unlock, deduct, return, put) against a SKU's
//! batches in FIFO order.

use std::collections::BTreeSet;

use chrono::Utc;

use batchledger_core::{LedgerError, LedgerResult};
use batchledger_inventory::ledger::{apply, ledger_order};
use batchledger_inventory::{BatchMovement, LedgerOperation, StockEvent, StockMoved};

use crate::services::context::LedgerContext;
use crate::store::BatchCriteria;

/// Result of one committed ledger operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub operation: LedgerOperation,
    pub movements: Vec<BatchMovement>,
}

impl OperationOutcome {
    pub fn moved_quantity(&self) -> i64 {
        self.movements.iter().map(|m| m.quantity).sum()
    }
}

/// Outcome of [`StockOperator::batch_process`].
///
/// Operations before `failure` are committed; the failing one and everything
/// after it are not.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchProcessReport {
    pub completed: Vec<OperationOutcome>,
    pub failure: Option<(usize, LedgerError)>,
}

impl BatchProcessReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct StockOperator {
    ctx: LedgerContext,
}

impl StockOperator {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Apply one operation atomically.
    pub fn process(&self, op: &LedgerOperation) -> LedgerResult<OperationOutcome> {
        let movements = self.ctx.transact("stock_operation", |tx| {
            let batches = tx.batches(&BatchCriteria::for_sku(op.sku.clone()))?;
            let mut ordered = ledger_order(&batches);
            let movements = apply(op, &mut ordered)?;

            let touched: BTreeSet<_> = movements.iter().map(|m| m.batch_id).collect();
            for batch in ordered.into_iter().filter(|b| touched.contains(&b.id_typed())) {
                tx.save_batch(batch)?;
            }

            tx.record(StockEvent::LedgerApplied(StockMoved {
                sku: op.sku.clone(),
                kind: Some(op.kind),
                quantity: op.quantity,
                reference: op.reference.clone(),
                movements: movements.clone(),
                total_cost: None,
                occurred_at: Utc::now(),
            }));
            Ok(movements)
        })?;

        tracing::info!(
            sku = %op.sku,
            kind = %op.kind,
            quantity = op.quantity,
            batches = movements.len(),
            "ledger operation applied"
        );
        Ok(OperationOutcome {
            operation: op.clone(),
            movements,
        })
    }

    /// Apply `ops` in order, one transaction each, stopping at the first
    /// failure.
    pub fn batch_process(&self, ops: &[LedgerOperation]) -> BatchProcessReport {
        let mut report = BatchProcessReport::default();
        for (idx, op) in ops.iter().enumerate() {
            match self.process(op) {
                Ok(outcome) => report.completed.push(outcome),
                Err(err) => {
                    tracing::warn!(index = idx, sku = %op.sku, kind = %op.kind, error = %err, "batch processing stopped");
                    report.failure = Some((idx, err));
                    break;
                }
            }
        }
        report
    }
}
