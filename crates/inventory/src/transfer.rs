use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use batchledger_core::{AggregateRoot, BatchId, LedgerError, LedgerResult, LocationId, TransferId};

/// Transfer lifecycle: `pending → in_transit → received`, or
/// `pending | in_transit → cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InTransit,
    Received,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::InTransit => "in_transit",
            TransferStatus::Received => "received",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub batch_id: BatchId,
    pub batch_no: String,
    pub quantity: i64,
    /// Set on receipt; may be below `quantity` when goods were lost en route.
    pub received_quantity: Option<i64>,
}

impl TransferItem {
    pub fn new(batch_id: BatchId, batch_no: impl Into<String>, quantity: i64) -> Self {
        Self {
            batch_id,
            batch_no: batch_no.into(),
            quantity,
            received_quantity: None,
        }
    }
}

/// Aggregate root: StockTransfer between two locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    id: TransferId,
    transfer_no: String,
    from_location: LocationId,
    to_location: LocationId,
    status: TransferStatus,
    items: Vec<TransferItem>,
    total_quantity: i64,
    created_time: DateTime<Utc>,
    shipped_time: Option<DateTime<Utc>>,
    received_time: Option<DateTime<Utc>>,
    receiver: Option<String>,
    metadata: BTreeMap<String, String>,
    version: u64,
}

impl StockTransfer {
    pub fn create(
        transfer_no: impl Into<String>,
        from_location: LocationId,
        to_location: LocationId,
        items: Vec<TransferItem>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let transfer_no = transfer_no.into();
        if transfer_no.trim().is_empty() {
            return Err(LedgerError::invalid_argument("transfer_no cannot be empty"));
        }
        if from_location == to_location {
            return Err(LedgerError::invalid_argument(format!(
                "transfer source and destination are both {from_location}"
            )));
        }
        if items.is_empty() {
            return Err(LedgerError::invalid_argument("transfer needs at least one item"));
        }
        if let Some(bad) = items.iter().find(|i| i.quantity <= 0) {
            return Err(LedgerError::invalid_argument(format!(
                "transfer quantity for batch {} must be positive (got {})",
                bad.batch_no, bad.quantity
            )));
        }

        let total_quantity = items.iter().map(|i| i.quantity).sum();
        Ok(Self {
            id: TransferId::new(),
            transfer_no,
            from_location,
            to_location,
            status: TransferStatus::Pending,
            items,
            total_quantity,
            created_time: now,
            shipped_time: None,
            received_time: None,
            receiver: None,
            metadata: BTreeMap::new(),
            version: 0,
        })
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn transfer_no(&self) -> &str {
        &self.transfer_no
    }

    pub fn from_location(&self) -> &LocationId {
        &self.from_location
    }

    pub fn to_location(&self) -> &LocationId {
        &self.to_location
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn items(&self) -> &[TransferItem] {
        &self.items
    }

    pub fn total_quantity(&self) -> i64 {
        self.total_quantity
    }

    pub fn received_quantity(&self) -> i64 {
        self.items.iter().filter_map(|i| i.received_quantity).sum()
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    pub fn shipped_time(&self) -> Option<DateTime<Utc>> {
        self.shipped_time
    }

    pub fn received_time(&self) -> Option<DateTime<Utc>> {
        self.received_time
    }

    pub fn receiver(&self) -> Option<&str> {
        self.receiver.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Batch number the destination receives an item under.
    pub fn destination_batch_no(&self, item: &TransferItem) -> String {
        format!("{}-{}", item.batch_no, self.to_location)
    }

    /// Reference stamped on the source re-credit when cancelling.
    pub fn cancel_reference(&self) -> String {
        format!("{}-CANCEL", self.transfer_no)
    }

    pub fn mark_shipped(&mut self, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_status(TransferStatus::Pending, "execute")?;
        self.status = TransferStatus::InTransit;
        self.shipped_time = Some(now);
        Ok(())
    }

    /// Record receipt. `actual` maps batch ids to received quantities; items
    /// it omits are received in full.
    pub fn mark_received(
        &mut self,
        receiver: impl Into<String>,
        actual: Option<&BTreeMap<BatchId, i64>>,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.ensure_status(TransferStatus::InTransit, "receive")?;

        let mut received = Vec::with_capacity(self.items.len());
        if let Some(actual) = actual {
            if let Some(stray) = actual.keys().find(|id| !self.items.iter().any(|i| i.batch_id == **id)) {
                return Err(LedgerError::invalid_argument(format!(
                    "batch {stray} is not part of transfer {}",
                    self.transfer_no
                )));
            }
        }
        for item in &self.items {
            let qty = actual
                .and_then(|a| a.get(&item.batch_id).copied())
                .unwrap_or(item.quantity);
            if qty < 0 || qty > item.quantity {
                return Err(LedgerError::invalid_argument(format!(
                    "received {qty} of batch {} but {} were shipped",
                    item.batch_no, item.quantity
                )));
            }
            received.push(qty);
        }

        for (item, qty) in self.items.iter_mut().zip(received) {
            item.received_quantity = Some(qty);
        }
        self.status = TransferStatus::Received;
        self.received_time = Some(now);
        self.receiver = Some(receiver.into());
        Ok(())
    }

    /// Cancel, returning the status cancelled from so the caller knows how
    /// to re-credit the source.
    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> LedgerResult<TransferStatus> {
        let previous = self.status;
        match previous {
            TransferStatus::Pending | TransferStatus::InTransit => {}
            TransferStatus::Received | TransferStatus::Cancelled => {
                return Err(LedgerError::invalid_operation(format!(
                    "transfer {} is {previous} and cannot be cancelled",
                    self.transfer_no
                )));
            }
        }

        self.status = TransferStatus::Cancelled;
        self.metadata.insert("cancelledAt".into(), now.to_rfc3339());
        self.metadata.insert("cancelReason".into(), reason.into());
        self.metadata.insert("cancelReference".into(), self.cancel_reference());
        Ok(previous)
    }

    fn ensure_status(&self, expected: TransferStatus, action: &str) -> LedgerResult<()> {
        if self.status != expected {
            return Err(LedgerError::invalid_operation(format!(
                "cannot {action} transfer {} in status {} (expected {expected})",
                self.transfer_no, self.status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for StockTransfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
