use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use batchledger_core::{BatchId, ExpectedVersion, LedgerError, LocationId, ReservationId, SkuRef, TransferId};
use batchledger_inventory::{Batch, BatchStatus, ReservationStatus, StockReservation, StockTransfer};

/// Filter for batch queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchCriteria {
    pub sku: Option<SkuRef>,
    /// `Some(None)` matches batches with no location.
    pub location: Option<Option<LocationId>>,
    pub status: Option<BatchStatus>,
    /// Only `available` batches with positive availability.
    pub available_only: bool,
}

impl BatchCriteria {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_sku(sku: impl Into<SkuRef>) -> Self {
        Self {
            sku: Some(sku.into()),
            ..Self::default()
        }
    }

    pub fn at_location(mut self, location: Option<LocationId>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_status(mut self, status: BatchStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn available_only(mut self) -> Self {
        self.available_only = true;
        self
    }

    pub fn matches(&self, batch: &Batch) -> bool {
        self.sku.as_ref().is_none_or(|sku| batch.sku() == sku)
            && self
                .location
                .as_ref()
                .is_none_or(|loc| batch.location_id() == loc.as_ref())
            && self.status.is_none_or(|status| batch.status() == status)
            && (!self.available_only || batch.is_allocatable())
    }
}

/// Filter for reservation queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationCriteria {
    pub sku: Option<SkuRef>,
    pub status: Option<ReservationStatus>,
    /// Only reservations whose expiry is strictly before this instant.
    pub expires_before: Option<DateTime<Utc>>,
}

impl ReservationCriteria {
    pub fn pending() -> Self {
        Self {
            status: Some(ReservationStatus::Pending),
            ..Self::default()
        }
    }

    pub fn for_sku(mut self, sku: impl Into<SkuRef>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn expiring_before(mut self, at: DateTime<Utc>) -> Self {
        self.expires_before = Some(at);
        self
    }

    pub fn matches(&self, reservation: &StockReservation) -> bool {
        self.sku.as_ref().is_none_or(|sku| reservation.sku() == sku)
            && self.status.is_none_or(|status| reservation.status() == status)
            && self
                .expires_before
                .is_none_or(|at| reservation.expires_time() < at)
    }
}

/// Every row written by one unit of work, each with the version it was
/// read at. Committed all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub batches: Vec<(Batch, ExpectedVersion)>,
    pub reservations: Vec<(StockReservation, ExpectedVersion)>,
    pub transfers: Vec<(StockTransfer, ExpectedVersion)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.reservations.is_empty() && self.transfers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len() + self.reservations.len() + self.transfers.len()
    }
}

/// Ledger store operation error.
///
/// Infrastructure-side failures, as opposed to the business errors in
/// [`LedgerError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("batch number already in use: {0}")]
    DuplicateBatchNo(String),

    #[error("transfer number already in use: {0}")]
    DuplicateTransferNo(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::Conflict(msg),
            StoreError::DuplicateBatchNo(no) => LedgerError::DuplicateBatchNo(no),
            StoreError::DuplicateTransferNo(no) => LedgerError::DuplicateTransferNo(no),
            StoreError::Unavailable(msg) => LedgerError::Storage(msg),
        }
    }
}

/// Persistence boundary for batches, reservations and transfers.
///
/// ## Read semantics
///
/// Queries are exhaustive and deterministic: batches come back ordered by
/// create time then batch number, reservations by created time then id.
///
/// ## Commit semantics
///
/// `commit()`:
/// - checks every row's `ExpectedVersion` against the stored version
///   (`Exact(0)` means the row must not exist yet)
/// - enforces batch number and transfer number uniqueness
/// - writes every row with its version bumped by one, or writes nothing
pub trait LedgerStore: Send + Sync {
    fn find_batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError>;

    fn find_batch_by_no(&self, batch_no: &str) -> Result<Option<Batch>, StoreError>;

    fn find_batches(&self, criteria: &BatchCriteria) -> Result<Vec<Batch>, StoreError>;

    /// Allocatable batches of `sku`.
    fn find_available_by_sku(&self, sku: &SkuRef) -> Result<Vec<Batch>, StoreError> {
        self.find_batches(&BatchCriteria::for_sku(sku.clone()).available_only())
    }

    fn find_reservation(&self, id: ReservationId) -> Result<Option<StockReservation>, StoreError>;

    fn find_reservations(&self, criteria: &ReservationCriteria) -> Result<Vec<StockReservation>, StoreError>;

    fn find_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError>;

    fn find_transfer_by_no(&self, transfer_no: &str) -> Result<Option<StockTransfer>, StoreError>;

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn find_batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        (**self).find_batch(id)
    }

    fn find_batch_by_no(&self, batch_no: &str) -> Result<Option<Batch>, StoreError> {
        (**self).find_batch_by_no(batch_no)
    }

    fn find_batches(&self, criteria: &BatchCriteria) -> Result<Vec<Batch>, StoreError> {
        (**self).find_batches(criteria)
    }

    fn find_available_by_sku(&self, sku: &SkuRef) -> Result<Vec<Batch>, StoreError> {
        (**self).find_available_by_sku(sku)
    }

    fn find_reservation(&self, id: ReservationId) -> Result<Option<StockReservation>, StoreError> {
        (**self).find_reservation(id)
    }

    fn find_reservations(&self, criteria: &ReservationCriteria) -> Result<Vec<StockReservation>, StoreError> {
        (**self).find_reservations(criteria)
    }

    fn find_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError> {
        (**self).find_transfer(id)
    }

    fn find_transfer_by_no(&self, transfer_no: &str) -> Result<Option<StockTransfer>, StoreError> {
        (**self).find_transfer_by_no(transfer_no)
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        (**self).commit(changes)
    }
}

/// Canonical batch order used by every query.
pub(crate) fn sort_batches(batches: &mut [Batch]) {
    batches.sort_by(|a, b| {
        a.create_time()
            .cmp(&b.create_time())
            .then_with(|| a.batch_no().cmp(b.batch_no()))
            .then_with(|| a.id_typed().cmp(&b.id_typed()))
    });
}

pub(crate) fn sort_reservations(reservations: &mut [StockReservation]) {
    reservations.sort_by(|a, b| {
        a.created_time()
            .cmp(&b.created_time())
            .then_with(|| a.id_typed().cmp(&b.id_typed()))
    });
}
