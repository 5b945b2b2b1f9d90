//! Stock transfers between locations.
//!
//! Creating a transfer places a transfer hold on each source batch: locked
//! stock that only this coordinator can release or ship. Executing it ships
//! the hold; receiving books the goods into a destination batch named
//! `{batch_no}-{to_location}`. Cancelling before shipment releases the hold;
//! cancelling in transit credits the shipped stock back to the source batch
//! whatever its status, so a cancel from `in_transit` cannot be blocked.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use batchledger_core::{BatchId, LedgerError, LedgerResult, LocationId, TransferId};
use batchledger_inventory::{
    Batch, NewBatch, StockEvent, StockTransfer, TransferChanged, TransferItem, TransferStatus,
};

use crate::services::batch_service::{batch_changed, receive_inbound_in};
use crate::services::context::LedgerContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub transfer_no: String,
    pub from_location: LocationId,
    pub to_location: LocationId,
    /// `(source batch, quantity)` pairs; each batch at most once.
    pub items: Vec<(BatchId, i64)>,
}

impl TransferRequest {
    pub fn new(
        transfer_no: impl Into<String>,
        from_location: impl Into<LocationId>,
        to_location: impl Into<LocationId>,
    ) -> Self {
        Self {
            transfer_no: transfer_no.into(),
            from_location: from_location.into(),
            to_location: to_location.into(),
            items: Vec::new(),
        }
    }

    pub fn item(mut self, batch_id: BatchId, quantity: i64) -> Self {
        self.items.push((batch_id, quantity));
        self
    }

    fn validate(&self) -> LedgerResult<()> {
        if self.from_location == self.to_location {
            return Err(LedgerError::invalid_argument(format!(
                "transfer source and destination are both {}",
                self.from_location
            )));
        }
        if self.items.is_empty() {
            return Err(LedgerError::invalid_argument("transfer needs at least one item"));
        }
        if let Some((id, qty)) = self.items.iter().find(|(_, qty)| *qty <= 0) {
            return Err(LedgerError::invalid_argument(format!(
                "transfer quantity for batch {id} must be positive (got {qty})"
            )));
        }
        let distinct: BTreeSet<_> = self.items.iter().map(|(id, _)| id).collect();
        if distinct.len() != self.items.len() {
            return Err(LedgerError::invalid_argument("transfer names a batch more than once"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TransferCoordinator {
    ctx: LedgerContext,
}

impl TransferCoordinator {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    pub fn create(&self, req: &TransferRequest, now: DateTime<Utc>) -> LedgerResult<StockTransfer> {
        req.validate()?;

        let transfer = self.ctx.transact("create_transfer", |tx| {
            if tx.transfer_by_no(&req.transfer_no)?.is_some() {
                return Err(LedgerError::DuplicateTransferNo(req.transfer_no.clone()));
            }

            let mut items = Vec::with_capacity(req.items.len());
            for (batch_id, qty) in &req.items {
                let mut batch = tx.batch(*batch_id)?;
                ensure_transferable(&batch, &req.from_location, *qty)?;
                batch.hold_for_transfer(*qty)?;
                items.push(TransferItem::new(*batch_id, batch.batch_no(), *qty));
                tx.save_batch(batch)?;
            }

            let transfer = StockTransfer::create(
                req.transfer_no.clone(),
                req.from_location.clone(),
                req.to_location.clone(),
                items,
                now,
            )?;
            let id = transfer.id_typed();
            tx.insert_transfer(transfer)?;
            let transfer = tx.transfer(id)?;
            tx.record(StockEvent::TransferCreated(changed(&transfer, transfer.total_quantity(), None, now)));
            Ok(transfer)
        })?;

        tracing::info!(
            transfer_no = transfer.transfer_no(),
            from = %transfer.from_location(),
            to = %transfer.to_location(),
            quantity = transfer.total_quantity(),
            "transfer created"
        );
        Ok(transfer)
    }

    /// Ship: the locked source stock leaves the ledger.
    pub fn execute(&self, id: TransferId, now: DateTime<Utc>) -> LedgerResult<StockTransfer> {
        let transfer = self.ctx.transact("execute_transfer", |tx| {
            let mut transfer = tx.transfer(id)?;
            transfer.mark_shipped(now)?;
            for item in transfer.items() {
                let mut batch = tx.batch(item.batch_id)?;
                batch.ship_transfer_hold(item.quantity)?;
                tx.save_batch(batch)?;
            }

            tx.save_transfer(transfer)?;
            let transfer = tx.transfer(id)?;
            tx.record(StockEvent::TransferShipped(changed(&transfer, transfer.total_quantity(), None, now)));
            Ok(transfer)
        })?;

        tracing::info!(transfer_no = transfer.transfer_no(), quantity = transfer.total_quantity(), "transfer shipped");
        Ok(transfer)
    }

    /// Book the goods in at the destination. `actual` overrides the received
    /// quantity per source batch; omitted items arrive in full.
    pub fn receive(
        &self,
        id: TransferId,
        receiver: &str,
        actual: Option<&BTreeMap<BatchId, i64>>,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockTransfer> {
        let transfer = self.ctx.transact("receive_transfer", |tx| {
            let mut transfer = tx.transfer(id)?;
            transfer.mark_received(receiver, actual, now)?;

            for item in transfer.items() {
                let qty = item.received_quantity.unwrap_or(0);
                if qty == 0 {
                    continue;
                }
                let source = tx.batch(item.batch_id)?;
                let receipt = inbound_like(&source, transfer.destination_batch_no(item), qty)
                    .at_location(transfer.to_location().clone());
                receive_inbound_in(tx, &receipt)?;
            }

            tx.save_transfer(transfer)?;
            let transfer = tx.transfer(id)?;
            tx.record(StockEvent::TransferReceived(changed(&transfer, transfer.received_quantity(), None, now)));
            Ok(transfer)
        })?;

        tracing::info!(
            transfer_no = transfer.transfer_no(),
            receiver,
            shipped = transfer.total_quantity(),
            received = transfer.received_quantity(),
            "transfer received"
        );
        Ok(transfer)
    }

    /// Cancel from `pending` or `in_transit`, re-crediting the source once.
    pub fn cancel(&self, id: TransferId, reason: &str, now: DateTime<Utc>) -> LedgerResult<StockTransfer> {
        let transfer = self.ctx.transact("cancel_transfer", |tx| {
            let mut transfer = tx.transfer(id)?;
            let previous = transfer.cancel(reason, now)?;

            match previous {
                TransferStatus::Pending => {
                    for item in transfer.items() {
                        let mut batch = tx.batch(item.batch_id)?;
                        batch.release_transfer_hold(item.quantity)?;
                        tx.save_batch(batch)?;
                    }
                }
                TransferStatus::InTransit => {
                    for item in transfer.items() {
                        let mut source = tx.batch(item.batch_id)?;
                        source.credit(item.quantity)?;
                        tx.record(StockEvent::BatchReceived(batch_changed(&source, item.quantity, Vec::new())));
                        tx.save_batch(source)?;
                    }
                }
                TransferStatus::Received | TransferStatus::Cancelled => {}
            }

            tx.save_transfer(transfer)?;
            let transfer = tx.transfer(id)?;
            tx.record(StockEvent::TransferCancelled(changed(
                &transfer,
                transfer.total_quantity(),
                Some(reason.to_string()),
                now,
            )));
            Ok((transfer, previous))
        });

        let (transfer, previous) = transfer?;
        tracing::info!(
            transfer_no = transfer.transfer_no(),
            from_status = %previous,
            reference = %transfer.cancel_reference(),
            reason,
            "transfer cancelled"
        );
        Ok(transfer)
    }

    pub fn find(&self, id: TransferId) -> LedgerResult<Option<StockTransfer>> {
        Ok(self.ctx.store().find_transfer(id)?)
    }

    pub fn find_by_no(&self, transfer_no: &str) -> LedgerResult<Option<StockTransfer>> {
        Ok(self.ctx.store().find_transfer_by_no(transfer_no)?)
    }
}

fn ensure_transferable(batch: &Batch, from: &LocationId, qty: i64) -> LedgerResult<()> {
    if batch.location_id() != Some(from) {
        return Err(LedgerError::invalid_operation(format!(
            "batch {} is not at {from}",
            batch.batch_no()
        )));
    }
    if !batch.status().is_allocatable() {
        return Err(LedgerError::invalid_operation(format!(
            "batch {} is {} and cannot be transferred",
            batch.batch_no(),
            batch.status()
        )));
    }
    if batch.available_quantity() < qty {
        return Err(LedgerError::insufficient(
            batch.sku().as_str(),
            qty,
            batch.available_quantity(),
        ));
    }
    Ok(())
}

/// Receipt carrying `source`'s cost, quality, dates and location.
fn inbound_like(source: &Batch, batch_no: String, qty: i64) -> NewBatch {
    let mut receipt = NewBatch::new(batch_no, source.sku().clone(), qty, source.unit_cost(), source.create_time())
        .with_quality(source.quality_level());
    receipt.location_id = source.location_id().cloned();
    receipt.production_date = source.production_date();
    receipt.expiry_date = source.expiry_date();
    receipt
}

fn changed(transfer: &StockTransfer, quantity: i64, reason: Option<String>, now: DateTime<Utc>) -> TransferChanged {
    TransferChanged {
        transfer_id: transfer.id_typed(),
        transfer_no: transfer.transfer_no().to_string(),
        from_location: transfer.from_location().clone(),
        to_location: transfer.to_location().clone(),
        quantity,
        reason,
        occurred_at: now,
    }
}
