//! Ledger operations (lock / unlock / deduct / return / put) over a SKU's
//! batches in ledger order.
//!
//! Ledger order is FIFO by create time. Each operation validates its total
//! before touching a single batch, so a failed call leaves every batch as it
//! was.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use batchledger_core::{BatchId, LedgerError, LedgerResult, SkuRef, ValueObject};

use crate::batch::Batch;
use crate::strategy::{AllocationStrategy, Fifo};

/// Stock log operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Lock,
    Unlock,
    Deduct,
    Return,
    Put,
    Inbound,
    Outbound,
    Transfer,
    Adjustment,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Lock => "lock",
            OperationKind::Unlock => "unlock",
            OperationKind::Deduct => "deduct",
            OperationKind::Return => "return",
            OperationKind::Put => "put",
            OperationKind::Inbound => "inbound",
            OperationKind::Outbound => "outbound",
            OperationKind::Transfer => "transfer",
            OperationKind::Adjustment => "adjustment",
        }
    }

    /// Whether [`apply`] handles this kind.
    pub fn is_ledger_operation(self) -> bool {
        matches!(
            self,
            OperationKind::Lock
                | OperationKind::Unlock
                | OperationKind::Deduct
                | OperationKind::Return
                | OperationKind::Put
        )
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lock" => Ok(OperationKind::Lock),
            "unlock" => Ok(OperationKind::Unlock),
            "deduct" => Ok(OperationKind::Deduct),
            "return" => Ok(OperationKind::Return),
            "put" => Ok(OperationKind::Put),
            "inbound" => Ok(OperationKind::Inbound),
            "outbound" => Ok(OperationKind::Outbound),
            "transfer" => Ok(OperationKind::Transfer),
            "adjustment" => Ok(OperationKind::Adjustment),
            other => Err(LedgerError::invalid_argument(format!("unknown operation type '{other}'"))),
        }
    }
}

/// One stock log entry to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOperation {
    pub sku: SkuRef,
    pub kind: OperationKind,
    pub quantity: i64,
    /// Caller's business reference (order number, return slip, ...).
    pub reference: Option<String>,
}

impl ValueObject for LedgerOperation {}

impl LedgerOperation {
    pub fn new(sku: impl Into<SkuRef>, kind: OperationKind, quantity: i64) -> Self {
        Self {
            sku: sku.into(),
            kind,
            quantity,
            reference: None,
        }
    }

    pub fn lock(sku: impl Into<SkuRef>, quantity: i64) -> Self {
        Self::new(sku, OperationKind::Lock, quantity)
    }

    pub fn unlock(sku: impl Into<SkuRef>, quantity: i64) -> Self {
        Self::new(sku, OperationKind::Unlock, quantity)
    }

    pub fn deduct(sku: impl Into<SkuRef>, quantity: i64) -> Self {
        Self::new(sku, OperationKind::Deduct, quantity)
    }

    pub fn return_stock(sku: impl Into<SkuRef>, quantity: i64) -> Self {
        Self::new(sku, OperationKind::Return, quantity)
    }

    pub fn put(sku: impl Into<SkuRef>, quantity: i64) -> Self {
        Self::new(sku, OperationKind::Put, quantity)
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Quantity moved on one batch by one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMovement {
    pub batch_id: BatchId,
    pub batch_no: String,
    pub quantity: i64,
}

impl ValueObject for BatchMovement {}

impl BatchMovement {
    pub fn of(batch: &Batch, quantity: i64) -> Self {
        Self {
            batch_id: batch.id_typed(),
            batch_no: batch.batch_no().to_string(),
            quantity,
        }
    }
}

/// Sort a SKU's batches into ledger order.
pub fn ledger_order(batches: &[Batch]) -> Vec<Batch> {
    Fifo.sort_batches(batches)
}

/// `put` credits the oldest batch.
pub fn select_put_target(ordered: &[Batch]) -> Option<usize> {
    if ordered.is_empty() { None } else { Some(0) }
}

/// `return` credits the newest batch.
pub fn select_return_target(ordered: &[Batch]) -> Option<usize> {
    ordered.len().checked_sub(1)
}

/// Apply `op` to `ordered` (the SKU's batches in ledger order).
pub fn apply(op: &LedgerOperation, ordered: &mut [Batch]) -> LedgerResult<Vec<BatchMovement>> {
    if op.quantity <= 0 {
        return Err(LedgerError::invalid_argument(format!(
            "{} quantity must be positive (got {})",
            op.kind, op.quantity
        )));
    }
    if let Some(stray) = ordered.iter().find(|b| b.sku() != &op.sku) {
        return Err(LedgerError::invalid_argument(format!(
            "batch {} does not belong to sku {}",
            stray.batch_no(),
            op.sku
        )));
    }

    match op.kind {
        OperationKind::Lock => draw_available(op, ordered, Batch::lock),
        OperationKind::Deduct => draw_available(op, ordered, Batch::consume_available),
        OperationKind::Unlock => release_locked(op.quantity, ordered),
        OperationKind::Return => credit_target(op, ordered, select_return_target),
        OperationKind::Put => credit_target(op, ordered, select_put_target),
        other => Err(LedgerError::invalid_operation(format!(
            "operation type '{other}' is not supported by the stock operator"
        ))),
    }
}

fn draw_available(
    op: &LedgerOperation,
    ordered: &mut [Batch],
    mv: fn(&mut Batch, i64) -> LedgerResult<()>,
) -> LedgerResult<Vec<BatchMovement>> {
    let total: i64 = ordered
        .iter()
        .filter(|b| b.status().is_allocatable())
        .map(Batch::available_quantity)
        .sum();
    if total < op.quantity {
        return Err(LedgerError::insufficient(op.sku.as_str(), op.quantity, total));
    }

    let mut remaining = op.quantity;
    let mut movements = Vec::new();
    for b in ordered.iter_mut().filter(|b| b.status().is_allocatable()) {
        if remaining == 0 {
            break;
        }
        let take = b.available_quantity().min(remaining);
        if take == 0 {
            continue;
        }
        mv(b, take)?;
        movements.push(BatchMovement::of(b, take));
        remaining -= take;
    }
    Ok(movements)
}

fn release_locked(quantity: i64, ordered: &mut [Batch]) -> LedgerResult<Vec<BatchMovement>> {
    let mut remaining = quantity;
    let mut movements = Vec::new();
    for b in ordered.iter_mut() {
        if remaining == 0 {
            break;
        }
        let take = b.free_locked_quantity().min(remaining);
        if take == 0 {
            continue;
        }
        b.unlock(take)?;
        movements.push(BatchMovement::of(b, take));
        remaining -= take;
    }
    Ok(movements)
}

fn credit_target(
    op: &LedgerOperation,
    ordered: &mut [Batch],
    select: fn(&[Batch]) -> Option<usize>,
) -> LedgerResult<Vec<BatchMovement>> {
    let idx = select(ordered).ok_or_else(|| {
        LedgerError::invalid_operation(format!("no batch exists for sku {}", op.sku))
    })?;
    let target = &mut ordered[idx];
    target.credit(op.quantity)?;
    Ok(vec![BatchMovement::of(target, op.quantity)])
}
