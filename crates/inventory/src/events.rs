//! Stock events emitted after a committed ledger change.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use batchledger_core::{BatchId, LocationId, ReservationId, SkuRef, TransferId};
use batchledger_events::Event;

use crate::ledger::{BatchMovement, OperationKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationChanged {
    pub reservation_id: ReservationId,
    pub sku: SkuRef,
    pub quantity: i64,
    pub business_id: String,
    pub batch_allocations: BTreeMap<String, i64>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Quantity drawn from or credited to batches by allocation or a ledger
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMoved {
    pub sku: SkuRef,
    pub kind: Option<OperationKind>,
    pub quantity: i64,
    pub reference: Option<String>,
    pub movements: Vec<BatchMovement>,
    pub total_cost: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

/// Batches created or reshaped by receipt, merge or split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchChanged {
    pub sku: SkuRef,
    pub batch_id: BatchId,
    pub batch_no: String,
    pub quantity: i64,
    pub source_batches: Vec<BatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferChanged {
    pub transfer_id: TransferId,
    pub transfer_no: String,
    pub from_location: LocationId,
    pub to_location: LocationId,
    pub quantity: i64,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StockEvent {
    Reserved(ReservationChanged),
    ReservationConfirmed(ReservationChanged),
    ReservationReleased(ReservationChanged),
    ReservationExpired(ReservationChanged),
    Allocated(StockMoved),
    LedgerApplied(StockMoved),
    BatchReceived(BatchChanged),
    BatchesMerged(BatchChanged),
    BatchSplit(BatchChanged),
    TransferCreated(TransferChanged),
    TransferShipped(TransferChanged),
    TransferReceived(TransferChanged),
    TransferCancelled(TransferChanged),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::Reserved(_) => "stock.reserved",
            StockEvent::ReservationConfirmed(_) => "stock.reservation.confirmed",
            StockEvent::ReservationReleased(_) => "stock.reservation.released",
            StockEvent::ReservationExpired(_) => "stock.reservation.expired",
            StockEvent::Allocated(_) => "stock.allocated",
            StockEvent::LedgerApplied(_) => "stock.ledger.applied",
            StockEvent::BatchReceived(_) => "stock.batch.received",
            StockEvent::BatchesMerged(_) => "stock.batch.merged",
            StockEvent::BatchSplit(_) => "stock.batch.split",
            StockEvent::TransferCreated(_) => "stock.transfer.created",
            StockEvent::TransferShipped(_) => "stock.transfer.shipped",
            StockEvent::TransferReceived(_) => "stock.transfer.received",
            StockEvent::TransferCancelled(_) => "stock.transfer.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::Reserved(e)
            | StockEvent::ReservationConfirmed(e)
            | StockEvent::ReservationReleased(e)
            | StockEvent::ReservationExpired(e) => e.occurred_at,
            StockEvent::Allocated(e) | StockEvent::LedgerApplied(e) => e.occurred_at,
            StockEvent::BatchReceived(e) | StockEvent::BatchesMerged(e) | StockEvent::BatchSplit(e) => e.occurred_at,
            StockEvent::TransferCreated(e)
            | StockEvent::TransferShipped(e)
            | StockEvent::TransferReceived(e)
            | StockEvent::TransferCancelled(e) => e.occurred_at,
        }
    }

    /// Reservations and transfers are keyed by their own id/number, stock
    /// movements and batch changes by SKU.
    fn subject(&self) -> String {
        match self {
            StockEvent::Reserved(e)
            | StockEvent::ReservationConfirmed(e)
            | StockEvent::ReservationReleased(e)
            | StockEvent::ReservationExpired(e) => e.reservation_id.to_string(),
            StockEvent::Allocated(e) | StockEvent::LedgerApplied(e) => e.sku.to_string(),
            StockEvent::BatchReceived(e) | StockEvent::BatchesMerged(e) | StockEvent::BatchSplit(e) => {
                e.sku.to_string()
            }
            StockEvent::TransferCreated(e)
            | StockEvent::TransferShipped(e)
            | StockEvent::TransferReceived(e)
            | StockEvent::TransferCancelled(e) => e.transfer_no.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::test_support::t0;

    #[test]
    fn event_types_are_namespaced_under_stock() {
        let moved = StockEvent::LedgerApplied(StockMoved {
            sku: SkuRef::new("SKU-1"),
            kind: Some(OperationKind::Lock),
            quantity: 5,
            reference: Some("SO-1".into()),
            movements: vec![],
            total_cost: None,
            occurred_at: t0(),
        });
        assert_eq!(moved.event_type(), "stock.ledger.applied");
        assert_eq!(moved.subject(), "SKU-1");
        assert_eq!(moved.occurred_at(), t0());
    }

    #[test]
    fn transfer_events_are_keyed_by_number() {
        let e = StockEvent::TransferCancelled(TransferChanged {
            transfer_id: TransferId::new(),
            transfer_no: "TR-9".into(),
            from_location: "A".into(),
            to_location: "B".into(),
            quantity: 3,
            reason: Some("mistake".into()),
            occurred_at: t0(),
        });
        assert_eq!(e.event_type(), "stock.transfer.cancelled");
        assert_eq!(e.subject(), "TR-9");
    }

    #[test]
    fn serializes_with_an_adjacent_tag() {
        let e = StockEvent::BatchSplit(BatchChanged {
            sku: SkuRef::new("SKU-1"),
            batch_id: BatchId::new(),
            batch_no: "S1".into(),
            quantity: 10,
            source_batches: vec![],
            occurred_at: t0(),
        });
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "batch_split");
        assert_eq!(json["data"]["batch_no"], "S1");
    }
}
