use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use batchledger_core::{AggregateRoot, BatchId, LedgerError, LedgerResult, LocationId, SkuRef};

/// Decimal places kept on a batch's weighted-average unit cost.
pub const COST_SCALE: u32 = 4;

/// Batch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InTransit,
    Available,
    PartiallyAvailable,
    Depleted,
    Expired,
    Damaged,
    Quarantined,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::InTransit => "in_transit",
            BatchStatus::Available => "available",
            BatchStatus::PartiallyAvailable => "partially_available",
            BatchStatus::Depleted => "depleted",
            BatchStatus::Expired => "expired",
            BatchStatus::Damaged => "damaged",
            BatchStatus::Quarantined => "quarantined",
        }
    }

    /// Whether the ledger operator may draw stock from a batch in this status.
    pub fn is_allocatable(self) -> bool {
        matches!(self, BatchStatus::Available | BatchStatus::PartiallyAvailable)
    }
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(BatchStatus::Pending),
            "in_transit" => Ok(BatchStatus::InTransit),
            "available" => Ok(BatchStatus::Available),
            "partially_available" => Ok(BatchStatus::PartiallyAvailable),
            "depleted" => Ok(BatchStatus::Depleted),
            "expired" => Ok(BatchStatus::Expired),
            "damaged" => Ok(BatchStatus::Damaged),
            "quarantined" => Ok(BatchStatus::Quarantined),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// Input for creating a batch (also used as an inbound receipt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub batch_no: String,
    pub sku: SkuRef,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub quality_level: String,
    pub location_id: Option<LocationId>,
    pub status: BatchStatus,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub create_time: DateTime<Utc>,
}

impl NewBatch {
    pub fn new(
        batch_no: impl Into<String>,
        sku: impl Into<SkuRef>,
        quantity: i64,
        unit_cost: Decimal,
        create_time: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_no: batch_no.into(),
            sku: sku.into(),
            quantity,
            unit_cost,
            quality_level: "standard".to_string(),
            location_id: None,
            status: BatchStatus::Available,
            production_date: None,
            expiry_date: None,
            create_time,
        }
    }

    pub fn at_location(mut self, location: impl Into<LocationId>) -> Self {
        self.location_id = Some(location.into());
        self
    }

    pub fn with_quality(mut self, quality_level: impl Into<String>) -> Self {
        self.quality_level = quality_level.into();
        self
    }

    pub fn with_status(mut self, status: BatchStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_expiry(mut self, expiry: NaiveDate) -> Self {
        self.expiry_date = Some(expiry);
        self
    }

    pub fn with_production_date(mut self, produced: NaiveDate) -> Self {
        self.production_date = Some(produced);
        self
    }
}

/// Flat persisted form of a [`Batch`].
///
/// Hydrating a record back into a batch re-checks every counter invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: BatchId,
    pub batch_no: String,
    pub sku: SkuRef,
    pub quantity: i64,
    pub available_quantity: i64,
    pub reserved_quantity: i64,
    pub locked_quantity: i64,
    /// Share of `locked_quantity` held by pending transfers.
    #[serde(default)]
    pub transfer_locked_quantity: i64,
    pub unit_cost: Decimal,
    pub quality_level: String,
    pub location_id: Option<LocationId>,
    pub status: BatchStatus,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub create_time: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: a lot of physical stock with its own quantity partitions.
///
/// Invariant: `quantity == available + reserved + locked`, all non-negative.
/// Every mutator either preserves it or fails before touching state.
///
/// `reserved` belongs to pending reservations and `transfer_locked` (a share
/// of `locked`) to pending transfers. Only their owners move that stock; the
/// rest of `locked` is the stock operator's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BatchRecord", into = "BatchRecord")]
pub struct Batch {
    id: BatchId,
    batch_no: String,
    sku: SkuRef,
    quantity: i64,
    available_quantity: i64,
    reserved_quantity: i64,
    locked_quantity: i64,
    transfer_locked_quantity: i64,
    unit_cost: Decimal,
    quality_level: String,
    location_id: Option<LocationId>,
    status: BatchStatus,
    production_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    create_time: DateTime<Utc>,
    version: u64,
}

impl Batch {
    /// Create a fresh batch whose whole quantity is available.
    pub fn create(new: NewBatch) -> LedgerResult<Self> {
        if new.batch_no.trim().is_empty() {
            return Err(LedgerError::invalid_argument("batch_no cannot be empty"));
        }
        if new.quantity < 0 {
            return Err(LedgerError::invalid_argument(format!(
                "batch quantity cannot be negative (got {})",
                new.quantity
            )));
        }
        if new.unit_cost < Decimal::ZERO {
            return Err(LedgerError::invalid_argument(format!(
                "unit cost cannot be negative (got {})",
                new.unit_cost
            )));
        }

        let mut batch = Self {
            id: BatchId::new(),
            batch_no: new.batch_no,
            sku: new.sku,
            quantity: new.quantity,
            available_quantity: new.quantity,
            reserved_quantity: 0,
            locked_quantity: 0,
            transfer_locked_quantity: 0,
            unit_cost: new.unit_cost.round_dp(COST_SCALE),
            quality_level: new.quality_level,
            location_id: new.location_id,
            status: new.status,
            production_date: new.production_date,
            expiry_date: new.expiry_date,
            create_time: new.create_time,
            version: 0,
        };
        batch.refresh_status();
        Ok(batch)
    }

    /// Rehydrate from a persisted record.
    pub fn from_record(record: BatchRecord) -> LedgerResult<Self> {
        let batch = Self {
            id: record.id,
            batch_no: record.batch_no,
            sku: record.sku,
            quantity: record.quantity,
            available_quantity: record.available_quantity,
            reserved_quantity: record.reserved_quantity,
            locked_quantity: record.locked_quantity,
            transfer_locked_quantity: record.transfer_locked_quantity,
            unit_cost: record.unit_cost,
            quality_level: record.quality_level,
            location_id: record.location_id,
            status: record.status,
            production_date: record.production_date,
            expiry_date: record.expiry_date,
            create_time: record.create_time,
            version: record.version,
        };
        batch
            .check_invariants()
            .map_err(LedgerError::InvalidQuantity)?;
        Ok(batch)
    }

    pub fn to_record(&self) -> BatchRecord {
        BatchRecord {
            id: self.id,
            batch_no: self.batch_no.clone(),
            sku: self.sku.clone(),
            quantity: self.quantity,
            available_quantity: self.available_quantity,
            reserved_quantity: self.reserved_quantity,
            locked_quantity: self.locked_quantity,
            transfer_locked_quantity: self.transfer_locked_quantity,
            unit_cost: self.unit_cost,
            quality_level: self.quality_level.clone(),
            location_id: self.location_id.clone(),
            status: self.status,
            production_date: self.production_date,
            expiry_date: self.expiry_date,
            create_time: self.create_time,
            version: self.version,
        }
    }

    pub fn id_typed(&self) -> BatchId {
        self.id
    }

    pub fn batch_no(&self) -> &str {
        &self.batch_no
    }

    pub fn sku(&self) -> &SkuRef {
        &self.sku
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn available_quantity(&self) -> i64 {
        self.available_quantity
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.reserved_quantity
    }

    pub fn locked_quantity(&self) -> i64 {
        self.locked_quantity
    }

    pub fn transfer_locked_quantity(&self) -> i64 {
        self.transfer_locked_quantity
    }

    /// Locked stock not owned by a transfer.
    pub fn free_locked_quantity(&self) -> i64 {
        self.locked_quantity - self.transfer_locked_quantity
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn quality_level(&self) -> &str {
        &self.quality_level
    }

    pub fn location_id(&self) -> Option<&LocationId> {
        self.location_id.as_ref()
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn production_date(&self) -> Option<NaiveDate> {
        self.production_date
    }

    pub fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    /// Candidate for strategy-driven allocation.
    pub fn is_allocatable(&self) -> bool {
        self.status == BatchStatus::Available && self.available_quantity > 0
    }

    /// Extended value of the batch at its current unit cost.
    pub fn stock_value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_cost
    }

    /// Change status by hand (quarantine, damage, release from inspection).
    ///
    /// `depleted` is derived from the counters and cannot be set or cleared
    /// this way.
    pub fn change_status(&mut self, status: BatchStatus) -> LedgerResult<()> {
        if status == BatchStatus::Depleted && self.quantity > 0 {
            return Err(LedgerError::invalid_operation(format!(
                "batch {} still holds {} units and cannot be marked depleted",
                self.batch_no, self.quantity
            )));
        }
        if self.quantity == 0 && status != BatchStatus::Depleted {
            return Err(LedgerError::invalid_operation(format!(
                "batch {} is empty and stays depleted",
                self.batch_no
            )));
        }
        self.status = status;
        Ok(())
    }

    /// Apply a signed correction to the batch total.
    ///
    /// Availability moves by `max(delta, -available)`: a shrink larger than
    /// what is available clamps availability at zero and takes the remainder
    /// from the operator's free locked stock. Reserved and transfer-locked
    /// stock is never shrunk; a delta that would need it fails with
    /// `InvalidQuantity`.
    pub fn adjust_quantity(&mut self, delta: i64) -> LedgerResult<()> {
        if delta == 0 {
            return Err(LedgerError::invalid_argument("adjustment delta cannot be zero"));
        }
        if self.quantity + delta < 0 {
            return Err(LedgerError::invalid_quantity(format!(
                "adjusting batch {} by {delta} would leave {} units",
                self.batch_no,
                self.quantity + delta
            )));
        }
        let shrinkable = self.available_quantity + self.free_locked_quantity();
        if -delta > shrinkable {
            return Err(LedgerError::invalid_quantity(format!(
                "batch {} can shrink by at most {shrinkable} (reserved {}, transfer-locked {}), not {}",
                self.batch_no,
                self.reserved_quantity,
                self.transfer_locked_quantity,
                -delta
            )));
        }

        if delta > 0 {
            self.quantity += delta;
            self.available_quantity += delta;
        } else {
            let mut shrink = -delta;
            let from_available = shrink.min(self.available_quantity);
            self.available_quantity -= from_available;
            shrink -= from_available;
            self.locked_quantity -= shrink;
            self.quantity += delta;
        }

        self.refresh_status();
        Ok(())
    }

    /// Re-average the unit cost for `added_qty` units arriving at `added_cost`.
    ///
    /// Must be called before the quantity itself is increased.
    pub fn update_unit_cost(&mut self, added_cost: Decimal, added_qty: i64) {
        let total = self.quantity + added_qty;
        if total <= 0 {
            return;
        }
        let value = Decimal::from(self.quantity) * self.unit_cost + Decimal::from(added_qty) * added_cost;
        self.unit_cost = (value / Decimal::from(total))
            .round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero);
    }

    /// available → locked
    pub fn lock(&mut self, qty: i64) -> LedgerResult<()> {
        self.ensure_within(qty, self.available_quantity, "available")?;
        self.available_quantity -= qty;
        self.locked_quantity += qty;
        Ok(())
    }

    /// locked → available, from the operator's pool only.
    pub fn unlock(&mut self, qty: i64) -> LedgerResult<()> {
        self.ensure_within(qty, self.free_locked_quantity(), "free locked")?;
        self.locked_quantity -= qty;
        self.available_quantity += qty;
        Ok(())
    }

    /// available → reserved
    pub fn reserve(&mut self, qty: i64) -> LedgerResult<()> {
        self.ensure_within(qty, self.available_quantity, "available")?;
        self.available_quantity -= qty;
        self.reserved_quantity += qty;
        Ok(())
    }

    /// reserved → available
    pub fn release_reserved(&mut self, qty: i64) -> LedgerResult<()> {
        self.ensure_within(qty, self.reserved_quantity, "reserved")?;
        self.reserved_quantity -= qty;
        self.available_quantity += qty;
        Ok(())
    }

    /// Remove `qty` available units from the ledger for good.
    pub fn consume_available(&mut self, qty: i64) -> LedgerResult<()> {
        self.ensure_within(qty, self.available_quantity, "available")?;
        self.available_quantity -= qty;
        self.quantity -= qty;
        self.refresh_status();
        Ok(())
    }

    /// Remove `qty` reserved units from the ledger for good.
    pub fn consume_reserved(&mut self, qty: i64) -> LedgerResult<()> {
        self.ensure_within(qty, self.reserved_quantity, "reserved")?;
        self.reserved_quantity -= qty;
        self.quantity -= qty;
        self.refresh_status();
        Ok(())
    }

    /// available → locked on behalf of a pending transfer.
    pub fn hold_for_transfer(&mut self, qty: i64) -> LedgerResult<()> {
        self.lock(qty)?;
        self.transfer_locked_quantity += qty;
        Ok(())
    }

    /// Undo [`Batch::hold_for_transfer`].
    pub fn release_transfer_hold(&mut self, qty: i64) -> LedgerResult<()> {
        self.ensure_within(qty, self.transfer_locked_quantity, "transfer-locked")?;
        self.transfer_locked_quantity -= qty;
        self.locked_quantity -= qty;
        self.available_quantity += qty;
        Ok(())
    }

    /// The transfer shipped: its held units leave the ledger.
    pub fn ship_transfer_hold(&mut self, qty: i64) -> LedgerResult<()> {
        self.ensure_within(qty, self.transfer_locked_quantity, "transfer-locked")?;
        self.transfer_locked_quantity -= qty;
        self.locked_quantity -= qty;
        self.quantity -= qty;
        self.refresh_status();
        Ok(())
    }

    /// Add `qty` units as available stock.
    pub fn credit(&mut self, qty: i64) -> LedgerResult<()> {
        if qty < 0 {
            return Err(LedgerError::invalid_quantity(format!(
                "cannot credit a negative quantity ({qty}) to batch {}",
                self.batch_no
            )));
        }
        self.quantity += qty;
        self.available_quantity += qty;
        self.refresh_status();
        Ok(())
    }

    /// Empty the batch after its stock moved into another batch.
    pub(crate) fn drain_into_merge(&mut self) -> LedgerResult<()> {
        if self.reserved_quantity > 0 || self.locked_quantity > 0 {
            return Err(LedgerError::invalid_operation(format!(
                "batch {} has reserved or locked stock and cannot be merged",
                self.batch_no
            )));
        }
        self.quantity = 0;
        self.available_quantity = 0;
        self.refresh_status();
        Ok(())
    }

    /// Check the counter partition.
    pub fn check_invariants(&self) -> Result<(), String> {
        let counters = [
            ("quantity", self.quantity),
            ("available", self.available_quantity),
            ("reserved", self.reserved_quantity),
            ("locked", self.locked_quantity),
        ];
        if let Some((name, value)) = counters.iter().find(|(_, v)| *v < 0) {
            return Err(format!("batch {}: {name} is negative ({value})", self.batch_no));
        }
        if self.transfer_locked_quantity < 0 || self.transfer_locked_quantity > self.locked_quantity {
            return Err(format!(
                "batch {}: transfer-locked {} outside 0..=locked {}",
                self.batch_no, self.transfer_locked_quantity, self.locked_quantity
            ));
        }
        let parts = self.available_quantity + self.reserved_quantity + self.locked_quantity;
        if parts != self.quantity {
            return Err(format!(
                "batch {}: quantity {} != available {} + reserved {} + locked {}",
                self.batch_no,
                self.quantity,
                self.available_quantity,
                self.reserved_quantity,
                self.locked_quantity
            ));
        }
        if self.quantity == 0 && self.status != BatchStatus::Depleted {
            return Err(format!("batch {}: empty but status is {}", self.batch_no, self.status));
        }
        Ok(())
    }

    /// Panic if the counter partition is broken.
    ///
    /// Every mutator keeps the partition intact, so a violation here means a
    /// bug in the ledger code, not bad input.
    pub fn assert_invariants(&self) {
        if let Err(msg) = self.check_invariants() {
            panic!("ledger invariant violated: {msg}");
        }
    }

    fn ensure_within(&self, qty: i64, bound: i64, counter: &str) -> LedgerResult<()> {
        if qty < 0 {
            return Err(LedgerError::invalid_quantity(format!(
                "negative movement ({qty}) on batch {}",
                self.batch_no
            )));
        }
        if qty > bound {
            return Err(LedgerError::invalid_quantity(format!(
                "batch {} has {bound} {counter}, cannot move {qty}",
                self.batch_no
            )));
        }
        Ok(())
    }

    fn refresh_status(&mut self) {
        if self.quantity == 0 {
            self.status = BatchStatus::Depleted;
        } else if self.status == BatchStatus::Depleted {
            self.status = BatchStatus::Available;
        }
    }
}

impl AggregateRoot for Batch {
    type Id = BatchId;

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

impl TryFrom<BatchRecord> for Batch {
    type Error = LedgerError;

    fn try_from(record: BatchRecord) -> Result<Self, Self::Error> {
        Batch::from_record(record)
    }
}

impl From<Batch> for BatchRecord {
    fn from(batch: Batch) -> Self {
        batch.to_record()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
    }

    /// Available batch created `minutes` after `t0`.
    pub fn batch(no: &str, qty: i64, cost: Decimal, minutes: i64) -> Batch {
        Batch::create(NewBatch::new(no, "SKU-1", qty, cost, t0() + Duration::minutes(minutes))).unwrap()
    }

    /// Batch with an exact counter partition.
    pub fn partitioned(no: &str, available: i64, reserved: i64, locked: i64, minutes: i64) -> Batch {
        let mut record = batch(no, 0, Decimal::ONE, minutes).to_record();
        record.quantity = available + reserved + locked;
        record.available_quantity = available;
        record.reserved_quantity = reserved;
        record.locked_quantity = locked;
        record.status = if record.quantity == 0 {
            BatchStatus::Depleted
        } else {
            BatchStatus::Available
        };
        Batch::from_record(record).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::test_support::*;
    use super::*;

    #[test]
    fn create_makes_everything_available() {
        let b = batch("B1", 100, dec!(10), 0);
        assert_eq!(b.quantity(), 100);
        assert_eq!(b.available_quantity(), 100);
        assert_eq!(b.status(), BatchStatus::Available);
        assert_eq!(b.version(), 0);
    }

    #[test]
    fn create_rejects_negative_quantity_and_cost() {
        let err = Batch::create(NewBatch::new("B1", "S", -1, dec!(1), t0())).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        let err = Batch::create(NewBatch::new("B1", "S", 1, dec!(-1), t0())).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[test]
    fn empty_batch_starts_depleted() {
        let b = batch("B0", 0, dec!(1), 0);
        assert_eq!(b.status(), BatchStatus::Depleted);
    }

    #[test]
    fn positive_adjustment_grows_total_and_available() {
        let mut b = partitioned("B1", 50, 10, 5, 0);
        b.adjust_quantity(20).unwrap();
        assert_eq!((b.quantity(), b.available_quantity()), (85, 70));
        b.assert_invariants();
    }

    #[test]
    fn negative_adjustment_clamps_available_at_zero() {
        let mut b = partitioned("B1", 30, 20, 10, 0);
        b.adjust_quantity(-35).unwrap();
        assert_eq!(b.quantity(), 25);
        assert_eq!(b.available_quantity(), 0);
        assert_eq!(b.reserved_quantity(), 20);
        assert_eq!(b.locked_quantity(), 5);
        b.assert_invariants();
    }

    #[test]
    fn adjustment_never_shrinks_owned_holds() {
        let mut b = partitioned("B1", 30, 20, 0, 0);
        b.hold_for_transfer(10).unwrap();
        let before = b.clone();

        let err = b.adjust_quantity(-21).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity(msg) if msg.contains("at most 20")));
        assert_eq!(b, before);

        b.adjust_quantity(-20).unwrap();
        assert_eq!((b.quantity(), b.available_quantity()), (30, 0));
        assert_eq!((b.reserved_quantity(), b.transfer_locked_quantity()), (20, 10));
    }

    #[test]
    fn adjustment_below_zero_is_rejected_without_mutation() {
        let mut b = partitioned("B1", 30, 0, 0, 0);
        let before = b.clone();
        let err = b.adjust_quantity(-31).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity(_)));
        assert_eq!(b, before);
    }

    #[test]
    fn adjusting_to_zero_depletes() {
        let mut b = batch("B1", 10, dec!(1), 0);
        b.adjust_quantity(-10).unwrap();
        assert_eq!(b.status(), BatchStatus::Depleted);
    }

    #[test]
    fn unit_cost_is_weighted_against_prior_quantity() {
        let mut b = batch("B1", 100, dec!(10.00), 0);
        b.update_unit_cost(dec!(12.00), 150);
        assert_eq!(b.unit_cost(), dec!(11.20));
    }

    #[test]
    fn unit_cost_rounds_to_cost_scale() {
        let mut b = batch("B1", 2, dec!(0.5), 0);
        b.update_unit_cost(dec!(0), 1);
        assert_eq!(b.unit_cost(), dec!(0.3333));
    }

    #[test]
    fn moves_reject_more_than_the_source_counter() {
        let mut b = partitioned("B1", 10, 0, 0, 0);
        assert!(matches!(b.lock(11), Err(LedgerError::InvalidQuantity(_))));
        assert!(matches!(b.unlock(1), Err(LedgerError::InvalidQuantity(_))));
        assert!(matches!(b.consume_reserved(1), Err(LedgerError::InvalidQuantity(_))));
        b.lock(4).unwrap();
        b.reserve(6).unwrap();
        assert_eq!(b.available_quantity(), 0);
        b.unlock(4).unwrap();
        b.hold_for_transfer(4).unwrap();
        b.ship_transfer_hold(4).unwrap();
        b.consume_reserved(6).unwrap();
        assert_eq!(b.status(), BatchStatus::Depleted);
    }

    #[test]
    fn operator_unlock_cannot_touch_transfer_holds() {
        let mut b = partitioned("B1", 50, 0, 0, 0);
        b.lock(5).unwrap();
        b.hold_for_transfer(30).unwrap();
        assert_eq!((b.locked_quantity(), b.free_locked_quantity()), (35, 5));

        assert!(matches!(b.unlock(6), Err(LedgerError::InvalidQuantity(_))));
        b.unlock(5).unwrap();
        assert_eq!(b.transfer_locked_quantity(), 30);

        b.release_transfer_hold(30).unwrap();
        assert_eq!((b.available_quantity(), b.locked_quantity()), (50, 0));
        assert!(b.release_transfer_hold(1).is_err());
    }

    #[test]
    fn credit_revives_a_depleted_batch() {
        let mut b = batch("B1", 5, dec!(1), 0);
        b.consume_available(5).unwrap();
        assert_eq!(b.status(), BatchStatus::Depleted);
        b.credit(3).unwrap();
        assert_eq!(b.status(), BatchStatus::Available);
        assert_eq!(b.available_quantity(), 3);
    }

    #[test]
    fn credit_keeps_manual_statuses() {
        let mut b = batch("B1", 5, dec!(1), 0);
        b.change_status(BatchStatus::Quarantined).unwrap();
        b.credit(1).unwrap();
        assert_eq!(b.status(), BatchStatus::Quarantined);
    }

    #[test]
    fn status_strings_parse_and_unknowns_fail() {
        assert_eq!("in_transit".parse::<BatchStatus>().unwrap(), BatchStatus::InTransit);
        assert_eq!(
            "partially_available".parse::<BatchStatus>().unwrap(),
            BatchStatus::PartiallyAvailable
        );
        let err = "lost".parse::<BatchStatus>().unwrap_err();
        assert_eq!(err, LedgerError::InvalidStatus("lost".into()));
    }

    #[test]
    fn depleted_cannot_be_set_while_stock_remains() {
        let mut b = batch("B1", 5, dec!(1), 0);
        assert!(b.change_status(BatchStatus::Depleted).is_err());
        let mut empty = batch("B0", 0, dec!(1), 0);
        assert!(empty.change_status(BatchStatus::Available).is_err());
    }

    #[test]
    fn hydration_rejects_broken_partitions() {
        let mut record = batch("B1", 10, dec!(1), 0).to_record();
        record.locked_quantity = 3;
        let err = Batch::from_record(record).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity(msg) if msg.contains("quantity 10")));
    }

    #[test]
    fn serde_goes_through_the_record() {
        let b = partitioned("B1", 7, 2, 1, 0);
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"available_quantity\":7"));
        let back: Batch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);

        let broken = json.replace("\"locked_quantity\":1", "\"locked_quantity\":5");
        assert!(serde_json::from_str::<Batch>(&broken).is_err());

        let over_held = json.replace("\"transfer_locked_quantity\":0", "\"transfer_locked_quantity\":2");
        assert!(serde_json::from_str::<Batch>(&over_held).is_err());
    }

    #[test]
    #[should_panic(expected = "ledger invariant violated")]
    fn assert_invariants_panics_on_violation() {
        let mut b = batch("B1", 10, dec!(1), 0);
        b.available_quantity = 4;
        b.assert_invariants();
    }
}
