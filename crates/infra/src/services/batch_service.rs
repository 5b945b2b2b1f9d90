//! Batch lifecycle: creation, inbound receipt, merge, split, corrections.

use chrono::Utc;

use batchledger_core::{BatchId, LedgerError, LedgerResult};
use batchledger_inventory::batch_manager;
use batchledger_inventory::{
    Batch, BatchChanged, BatchMovement, BatchStatus, NewBatch, OperationKind, StockEvent, StockMoved,
};

use crate::services::context::LedgerContext;
use crate::store::Transaction;

#[derive(Debug, Clone)]
pub struct BatchService {
    ctx: LedgerContext,
}

impl BatchService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Register a new batch. Fails with `DuplicateBatchNo` if the number is taken.
    pub fn create_batch(&self, new: NewBatch) -> LedgerResult<Batch> {
        let batch = self.ctx.transact("create_batch", |tx| {
            let batch = Batch::create(new.clone())?;
            let id = batch.id_typed();
            tx.insert_batch(batch)?;
            let batch = tx.batch(id)?;
            tx.record(StockEvent::BatchReceived(batch_changed(&batch, batch.quantity(), Vec::new())));
            Ok(batch)
        })?;

        tracing::info!(batch_no = batch.batch_no(), sku = %batch.sku(), quantity = batch.quantity(), "batch created");
        Ok(batch)
    }

    /// Receive stock by batch number: merge into the existing batch with
    /// re-averaged cost, or create it.
    pub fn receive_inbound(&self, receipt: NewBatch) -> LedgerResult<Batch> {
        let batch = self
            .ctx
            .transact("receive_inbound", |tx| receive_inbound_in(tx, &receipt))?;

        tracing::info!(
            batch_no = batch.batch_no(),
            sku = %batch.sku(),
            received = receipt.quantity,
            quantity = batch.quantity(),
            unit_cost = %batch.unit_cost(),
            "inbound received"
        );
        Ok(batch)
    }

    /// Merge `source_ids` into a new batch numbered `new_batch_no`.
    pub fn merge_batches(&self, source_ids: &[BatchId], new_batch_no: &str) -> LedgerResult<Batch> {
        let merged = self.ctx.transact("merge_batches", |tx| {
            let mut sources = source_ids.iter().map(|id| tx.batch(*id)).collect::<LedgerResult<Vec<_>>>()?;
            let merged = batch_manager::merge_batches(&mut sources, new_batch_no)?;

            let merged_id = merged.id_typed();
            let source_batches: Vec<BatchId> = sources.iter().map(Batch::id_typed).collect();
            for source in sources {
                tx.save_batch(source)?;
            }
            tx.insert_batch(merged)?;
            let merged = tx.batch(merged_id)?;
            tx.record(StockEvent::BatchesMerged(batch_changed(&merged, merged.quantity(), source_batches)));
            Ok(merged)
        })?;

        tracing::info!(
            batch_no = merged.batch_no(),
            sources = source_ids.len(),
            quantity = merged.quantity(),
            unit_cost = %merged.unit_cost(),
            "batches merged"
        );
        Ok(merged)
    }

    /// Carve `split_qty` available units into a new batch. Returns
    /// `(original, carved)`.
    pub fn split_batch(&self, id: BatchId, split_qty: i64, new_batch_no: &str) -> LedgerResult<(Batch, Batch)> {
        let (original, carved) = self.ctx.transact("split_batch", |tx| {
            let mut original = tx.batch(id)?;
            let carved = batch_manager::split_batch(&mut original, split_qty, new_batch_no)?;

            let carved_id = carved.id_typed();
            tx.save_batch(original)?;
            tx.insert_batch(carved)?;
            let original = tx.batch(id)?;
            let carved = tx.batch(carved_id)?;
            tx.record(StockEvent::BatchSplit(batch_changed(&carved, split_qty, vec![id])));
            Ok((original, carved))
        })?;

        tracing::info!(
            batch_no = original.batch_no(),
            new_batch_no = carved.batch_no(),
            quantity = split_qty,
            "batch split"
        );
        Ok((original, carved))
    }

    /// Apply a signed correction to a batch total.
    pub fn adjust_quantity(&self, id: BatchId, delta: i64) -> LedgerResult<Batch> {
        let batch = self.ctx.transact("adjust_quantity", |tx| {
            let mut batch = tx.batch(id)?;
            batch.adjust_quantity(delta)?;
            tx.save_batch(batch)?;
            let batch = tx.batch(id)?;
            tx.record(StockEvent::LedgerApplied(StockMoved {
                sku: batch.sku().clone(),
                kind: Some(OperationKind::Adjustment),
                quantity: delta,
                reference: None,
                movements: vec![BatchMovement::of(&batch, delta)],
                total_cost: None,
                occurred_at: Utc::now(),
            }));
            Ok(batch)
        })?;

        tracing::info!(batch_no = batch.batch_no(), delta, quantity = batch.quantity(), "batch quantity adjusted");
        Ok(batch)
    }

    /// Set a batch status from its string form (`InvalidStatus` if unknown).
    pub fn change_status(&self, id: BatchId, status: &str) -> LedgerResult<Batch> {
        let status: BatchStatus = status.parse()?;
        let batch = self.ctx.transact("change_status", |tx| {
            let mut batch = tx.batch(id)?;
            batch.change_status(status)?;
            tx.save_batch(batch)?;
            tx.batch(id)
        })?;

        tracing::info!(batch_no = batch.batch_no(), status = %status, "batch status changed");
        Ok(batch)
    }

    pub fn find(&self, id: BatchId) -> LedgerResult<Option<Batch>> {
        Ok(self.ctx.store().find_batch(id)?)
    }

    pub fn find_by_no(&self, batch_no: &str) -> LedgerResult<Option<Batch>> {
        Ok(self.ctx.store().find_batch_by_no(batch_no)?)
    }
}

/// Inbound path shared with transfer receipt and in-transit cancellation.
pub(crate) fn receive_inbound_in(tx: &mut Transaction<'_>, receipt: &NewBatch) -> LedgerResult<Batch> {
    if receipt.quantity <= 0 {
        return Err(LedgerError::invalid_argument(format!(
            "inbound quantity must be positive (got {})",
            receipt.quantity
        )));
    }

    let batch = match tx.batch_by_no(&receipt.batch_no)? {
        Some(mut existing) => {
            batch_manager::receive_into(&mut existing, receipt)?;
            let id = existing.id_typed();
            tx.save_batch(existing)?;
            tx.batch(id)?
        }
        None => {
            let created = Batch::create(receipt.clone())?;
            let id = created.id_typed();
            tx.insert_batch(created)?;
            tx.batch(id)?
        }
    };

    tx.record(StockEvent::BatchReceived(batch_changed(&batch, receipt.quantity, Vec::new())));
    Ok(batch)
}

pub(crate) fn batch_changed(batch: &Batch, quantity: i64, source_batches: Vec<BatchId>) -> BatchChanged {
    BatchChanged {
        sku: batch.sku().clone(),
        batch_id: batch.id_typed(),
        batch_no: batch.batch_no().to_string(),
        quantity,
        source_batches,
        occurred_at: Utc::now(),
    }
}
