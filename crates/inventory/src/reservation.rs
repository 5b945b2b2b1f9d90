//! Time-bounded stock reservations.
//!
//! While `pending`, a reservation's quantity sits in the `reserved` partition
//! of the batches named in `batch_allocations`. Confirming consumes that
//! stock; releasing or expiring hands it back to `available`. The batch side
//! of each transition is applied by the infra `ReservationManager` in the
//! same transaction as the status change.

use std::collections::BTreeMap;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use batchledger_core::{AggregateRoot, LedgerError, LedgerResult, ReservationId, SkuRef};

use crate::allocation::AllocationPlan;

/// Release reason recorded by the expiry sweep.
pub const EXPIRED_REASON: &str = "expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationType {
    Order,
    Promotion,
    Vip,
    System,
}

impl FromStr for ReservationType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "order" => Ok(ReservationType::Order),
            "promotion" => Ok(ReservationType::Promotion),
            "vip" => Ok(ReservationType::Vip),
            "system" => Ok(ReservationType::System),
            other => Err(LedgerError::invalid_argument(format!("unknown reservation type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }
}

impl core::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: StockReservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    id: ReservationId,
    sku: SkuRef,
    quantity: i64,
    reservation_type: ReservationType,
    business_id: String,
    status: ReservationStatus,
    batch_allocations: BTreeMap<String, i64>,
    expires_time: DateTime<Utc>,
    created_time: DateTime<Utc>,
    confirmed_time: Option<DateTime<Utc>>,
    released_time: Option<DateTime<Utc>>,
    release_reason: Option<String>,
    version: u64,
}

impl StockReservation {
    /// Open a pending reservation over `plan`.
    pub fn open(
        reservation_type: ReservationType,
        business_id: impl Into<String>,
        plan: &AllocationPlan,
        expires_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if plan.requested_quantity <= 0 {
            return Err(LedgerError::invalid_argument("reservation quantity must be positive"));
        }
        if plan.allocated_quantity() != plan.requested_quantity {
            return Err(LedgerError::invalid_argument(format!(
                "plan covers {} of {} requested units",
                plan.allocated_quantity(),
                plan.requested_quantity
            )));
        }
        if expires_time <= now {
            return Err(LedgerError::invalid_argument(format!(
                "reservation expiry {expires_time} is not after {now}"
            )));
        }

        Ok(Self {
            id: ReservationId::new(),
            sku: plan.sku.clone(),
            quantity: plan.requested_quantity,
            reservation_type,
            business_id: business_id.into(),
            status: ReservationStatus::Pending,
            batch_allocations: plan.batch_allocations(),
            expires_time,
            created_time: now,
            confirmed_time: None,
            released_time: None,
            release_reason: None,
            version: 0,
        })
    }

    pub fn id_typed(&self) -> ReservationId {
        self.id
    }

    pub fn sku(&self) -> &SkuRef {
        &self.sku
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reservation_type(&self) -> ReservationType {
        self.reservation_type
    }

    pub fn business_id(&self) -> &str {
        &self.business_id
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn batch_allocations(&self) -> &BTreeMap<String, i64> {
        &self.batch_allocations
    }

    pub fn expires_time(&self) -> DateTime<Utc> {
        self.expires_time
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    pub fn confirmed_time(&self) -> Option<DateTime<Utc>> {
        self.confirmed_time
    }

    pub fn released_time(&self) -> Option<DateTime<Utc>> {
        self.released_time
    }

    pub fn release_reason(&self) -> Option<&str> {
        self.release_reason.as_deref()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_time
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_pending("confirm")?;
        if self.is_expired_at(now) {
            return Err(LedgerError::ReservationExpired {
                id: self.id.to_string(),
                expires_at: self.expires_time,
            });
        }
        self.status = ReservationStatus::Confirmed;
        self.confirmed_time = Some(now);
        Ok(())
    }

    pub fn release(&mut self, reason: Option<String>, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_pending("release")?;
        self.status = ReservationStatus::Released;
        self.released_time = Some(now);
        self.release_reason = reason;
        Ok(())
    }

    /// Sweep transition. Only a still-pending reservation past its expiry
    /// may expire.
    pub fn expire(&mut self, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_pending("expire")?;
        if self.expires_time >= now {
            return Err(LedgerError::invalid_operation(format!(
                "reservation {} is valid until {}",
                self.id, self.expires_time
            )));
        }
        self.status = ReservationStatus::Expired;
        self.released_time = Some(now);
        self.release_reason = Some(EXPIRED_REASON.to_string());
        Ok(())
    }

    pub fn extend(&mut self, new_expiry: DateTime<Utc>, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_pending("extend")?;
        if new_expiry <= now {
            return Err(LedgerError::invalid_argument(format!(
                "new expiry {new_expiry} is not after {now}"
            )));
        }
        self.expires_time = new_expiry;
        Ok(())
    }

    fn ensure_pending(&self, action: &str) -> LedgerResult<()> {
        if self.status != ReservationStatus::Pending {
            return Err(LedgerError::invalid_operation(format!(
                "cannot {action} reservation {} in status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for StockReservation {
    type Id = ReservationId;

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

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::allocation::plan_allocation;
    use crate::batch::test_support::{batch, t0};
    use crate::strategy::Fifo;

    fn plan(qty: i64) -> AllocationPlan {
        let batches = vec![batch("A", 30, dec!(1), 0), batch("B", 30, dec!(1), 1)];
        plan_allocation(&SkuRef::new("SKU-1"), qty, &Fifo, &batches).unwrap()
    }

    fn pending(qty: i64) -> StockReservation {
        StockReservation::open(ReservationType::Order, "SO-1", &plan(qty), t0() + Duration::minutes(30), t0()).unwrap()
    }

    #[test]
    fn open_copies_the_plan_allocations() {
        let r = pending(40);
        assert_eq!(r.status(), ReservationStatus::Pending);
        assert_eq!(r.quantity(), 40);
        assert_eq!(
            r.batch_allocations(),
            &BTreeMap::from([("A".to_string(), 30), ("B".to_string(), 10)])
        );
    }

    #[test]
    fn open_requires_a_future_expiry() {
        let err = StockReservation::open(ReservationType::Vip, "X", &plan(1), t0(), t0()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[test]
    fn confirm_before_expiry_stamps_time() {
        let mut r = pending(5);
        let at = t0() + Duration::minutes(10);
        r.confirm(at).unwrap();
        assert_eq!(r.status(), ReservationStatus::Confirmed);
        assert_eq!(r.confirmed_time(), Some(at));
    }

    #[test]
    fn confirm_after_expiry_fails_and_leaves_status() {
        let mut r = pending(5);
        let err = r.confirm(t0() + Duration::minutes(31)).unwrap_err();
        assert!(matches!(err, LedgerError::ReservationExpired { .. }));
        assert_eq!(r.status(), ReservationStatus::Pending);
    }

    #[test]
    fn confirm_exactly_at_expiry_is_still_allowed() {
        let mut r = pending(5);
        r.confirm(t0() + Duration::minutes(30)).unwrap();
    }

    #[test]
    fn release_records_reason() {
        let mut r = pending(5);
        r.release(Some("customer cancelled".into()), t0()).unwrap();
        assert_eq!(r.status(), ReservationStatus::Released);
        assert_eq!(r.release_reason(), Some("customer cancelled"));
        assert!(r.released_time().is_some());
    }

    #[test]
    fn terminal_reservations_reject_every_transition() {
        let mut r = pending(5);
        r.confirm(t0()).unwrap();
        assert!(matches!(r.release(None, t0()), Err(LedgerError::InvalidOperation(_))));
        assert!(matches!(r.confirm(t0()), Err(LedgerError::InvalidOperation(_))));
        assert!(matches!(r.expire(t0() + Duration::hours(1)), Err(LedgerError::InvalidOperation(_))));
        assert!(matches!(r.extend(t0() + Duration::hours(2), t0()), Err(LedgerError::InvalidOperation(_))));
    }

    #[test]
    fn expire_requires_the_deadline_to_have_passed() {
        let mut r = pending(5);
        assert!(r.expire(t0() + Duration::minutes(30)).is_err());
        r.expire(t0() + Duration::minutes(31)).unwrap();
        assert_eq!(r.status(), ReservationStatus::Expired);
        assert_eq!(r.release_reason(), Some(EXPIRED_REASON));
    }

    #[test]
    fn extend_moves_only_the_deadline() {
        let mut r = pending(5);
        let later = t0() + Duration::hours(3);
        r.extend(later, t0()).unwrap();
        assert_eq!(r.expires_time(), later);
        assert_eq!(r.status(), ReservationStatus::Pending);
        assert!(r.extend(t0(), t0()).is_err());
    }

    #[test]
    fn reservation_types_parse() {
        assert_eq!("vip".parse::<ReservationType>().unwrap(), ReservationType::Vip);
        assert!("gold".parse::<ReservationType>().is_err());
    }
}
