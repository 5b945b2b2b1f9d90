//! Reservation lifecycle with a pessimistic hold.
//!
//! Opening a reservation moves its quantity from `available` to `reserved`
//! on the planned batches. Confirming consumes the reserved stock; releasing
//! or expiring returns it to `available`. Status change and batch counters
//! always commit together, so a reservation's hold is never lost or counted
//! twice.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use batchledger_core::{BatchId, LedgerError, LedgerResult, LocationId, ReservationId, SkuRef};
use batchledger_inventory::allocation::plan_from_batches;
use batchledger_inventory::{
    Batch, ReservationChanged, ReservationStatus, ReservationType, StockEvent, StockReservation,
};

use crate::services::allocation_engine::plan_in;
use crate::services::context::LedgerContext;
use crate::store::{ReservationCriteria, Transaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub sku: SkuRef,
    pub quantity: i64,
    pub reservation_type: ReservationType,
    pub business_id: String,
    /// Strategy name; the configured default when unset.
    pub strategy: Option<String>,
    pub location: Option<LocationId>,
    /// Reserve against exactly these batches, in this order.
    pub batch_ids: Option<Vec<BatchId>>,
    /// `now + reservation_ttl` when unset.
    pub expires_time: Option<DateTime<Utc>>,
}

impl ReserveRequest {
    pub fn new(
        sku: impl Into<SkuRef>,
        quantity: i64,
        reservation_type: ReservationType,
        business_id: impl Into<String>,
    ) -> Self {
        Self {
            sku: sku.into(),
            quantity,
            reservation_type,
            business_id: business_id.into(),
            strategy: None,
            location: None,
            batch_ids: None,
            expires_time: None,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn at_location(mut self, location: impl Into<LocationId>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn from_batches(mut self, batch_ids: Vec<BatchId>) -> Self {
        self.batch_ids = Some(batch_ids);
        self
    }

    pub fn expiring_at(mut self, expires_time: DateTime<Utc>) -> Self {
        self.expires_time = Some(expires_time);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ReservationManager {
    ctx: LedgerContext,
}

impl ReservationManager {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    pub fn reserve(&self, req: &ReserveRequest, now: DateTime<Utc>) -> LedgerResult<StockReservation> {
        if req.quantity <= 0 {
            return Err(LedgerError::invalid_argument(format!(
                "reservation quantity must be positive (got {})",
                req.quantity
            )));
        }
        let expires_time = match req.expires_time {
            Some(at) => at,
            None => {
                let ttl = Duration::from_std(self.ctx.config().reservation_ttl)
                    .map_err(|e| LedgerError::invalid_argument(format!("reservation ttl out of range: {e}")))?;
                now + ttl
            }
        };
        if expires_time <= now {
            return Err(LedgerError::invalid_argument(format!(
                "reservation expiry {expires_time} is not after {now}"
            )));
        }
        if let Some(ids) = &req.batch_ids {
            let distinct: BTreeSet<_> = ids.iter().collect();
            if distinct.len() != ids.len() {
                return Err(LedgerError::invalid_argument("reservation names a batch more than once"));
            }
        }
        let strategy = self.ctx.strategy(req.strategy.as_deref())?;

        let reservation = self.ctx.transact("reserve", |tx| {
            let plan = match &req.batch_ids {
                Some(ids) => {
                    let batches = ids.iter().map(|id| tx.batch(*id)).collect::<LedgerResult<Vec<_>>>()?;
                    plan_from_batches(&req.sku, req.quantity, &batches)?
                }
                None => plan_in(tx, &req.sku, req.quantity, strategy.as_ref(), req.location.as_ref())?,
            };

            let reservation =
                StockReservation::open(req.reservation_type, req.business_id.clone(), &plan, expires_time, now)?;
            for c in &plan.contributions {
                let mut batch = tx.batch(c.batch_id)?;
                batch.reserve(c.quantity)?;
                tx.save_batch(batch)?;
            }

            let id = reservation.id_typed();
            tx.insert_reservation(reservation)?;
            let reservation = tx.reservation(id)?;
            tx.record(StockEvent::Reserved(changed(&reservation, None, now)));
            Ok(reservation)
        })?;

        tracing::info!(
            reservation_id = %reservation.id_typed(),
            sku = %reservation.sku(),
            quantity = reservation.quantity(),
            batches = reservation.batch_allocations().len(),
            "stock reserved"
        );
        Ok(reservation)
    }

    /// Consume the hold. Fails with `ReservationExpired` past the deadline.
    pub fn confirm(&self, id: ReservationId, now: DateTime<Utc>) -> LedgerResult<StockReservation> {
        let reservation = self.ctx.transact("confirm_reservation", |tx| {
            let mut reservation = tx.reservation(id)?;
            reservation.confirm(now)?;
            for_each_hold(tx, &reservation, |batch, qty| batch.consume_reserved(qty))?;

            tx.save_reservation(reservation)?;
            let reservation = tx.reservation(id)?;
            tx.record(StockEvent::ReservationConfirmed(changed(&reservation, None, now)));
            Ok(reservation)
        })?;

        tracing::info!(reservation_id = %id, sku = %reservation.sku(), quantity = reservation.quantity(), "reservation confirmed");
        Ok(reservation)
    }

    /// Return the hold to available stock.
    pub fn release(&self, id: ReservationId, reason: Option<String>, now: DateTime<Utc>) -> LedgerResult<StockReservation> {
        let reservation = self.ctx.transact("release_reservation", |tx| {
            let mut reservation = tx.reservation(id)?;
            reservation.release(reason.clone(), now)?;
            for_each_hold(tx, &reservation, |batch, qty| batch.release_reserved(qty))?;

            tx.save_reservation(reservation)?;
            let reservation = tx.reservation(id)?;
            tx.record(StockEvent::ReservationReleased(changed(&reservation, reason.clone(), now)));
            Ok(reservation)
        })?;

        tracing::info!(reservation_id = %id, sku = %reservation.sku(), quantity = reservation.quantity(), "reservation released");
        Ok(reservation)
    }

    pub fn extend(&self, id: ReservationId, new_expiry: DateTime<Utc>, now: DateTime<Utc>) -> LedgerResult<StockReservation> {
        self.ctx.transact("extend_reservation", |tx| {
            let mut reservation = tx.reservation(id)?;
            reservation.extend(new_expiry, now)?;
            tx.save_reservation(reservation)?;
            tx.reservation(id)
        })
    }

    /// Expire every pending reservation whose deadline is before `now`.
    ///
    /// Each candidate is re-read and expired in its own transaction, so one
    /// confirmed or released in the meantime is skipped. Returns how many
    /// were expired.
    pub fn release_expired_reservations(&self, now: DateTime<Utc>) -> LedgerResult<usize> {
        let candidates = self
            .ctx
            .store()
            .find_reservations(&ReservationCriteria::pending().expiring_before(now))?;

        let mut expired = 0;
        for candidate in &candidates {
            match self.expire_one(candidate.id_typed(), now) {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(reservation_id = %candidate.id_typed(), error = %err, "failed to expire reservation");
                }
            }
        }

        if expired > 0 {
            tracing::info!(expired, candidates = candidates.len(), "expired reservations released");
        }
        Ok(expired)
    }

    /// Expire one reservation if it is still pending and past its deadline.
    pub(crate) fn expire_one(&self, id: ReservationId, now: DateTime<Utc>) -> LedgerResult<bool> {
        self.ctx.transact("expire_reservation", |tx| {
            let mut reservation = tx.reservation(id)?;
            if reservation.status() != ReservationStatus::Pending || reservation.expires_time() >= now {
                return Ok(false);
            }
            reservation.expire(now)?;
            for_each_hold(tx, &reservation, |batch, qty| batch.release_reserved(qty))?;

            tx.save_reservation(reservation)?;
            let reservation = tx.reservation(id)?;
            tx.record(StockEvent::ReservationExpired(changed(
                &reservation,
                reservation.release_reason().map(str::to_string),
                now,
            )));
            Ok(true)
        })
    }

    /// Units held by pending reservations of `sku`.
    pub fn get_reserved_quantity(&self, sku: &SkuRef) -> LedgerResult<i64> {
        Ok(self
            .get_active_reservations(sku)?
            .iter()
            .map(StockReservation::quantity)
            .sum())
    }

    pub fn get_active_reservations(&self, sku: &SkuRef) -> LedgerResult<Vec<StockReservation>> {
        Ok(self
            .ctx
            .store()
            .find_reservations(&ReservationCriteria::pending().for_sku(sku.clone()))?)
    }

    pub fn find(&self, id: ReservationId) -> LedgerResult<Option<StockReservation>> {
        Ok(self.ctx.store().find_reservation(id)?)
    }
}

/// Apply `mv` to every batch the reservation holds stock on.
fn for_each_hold(
    tx: &mut Transaction<'_>,
    reservation: &StockReservation,
    mv: impl Fn(&mut Batch, i64) -> LedgerResult<()>,
) -> LedgerResult<()> {
    for (batch_no, qty) in reservation.batch_allocations() {
        let mut batch = tx
            .batch_by_no(batch_no)?
            .ok_or_else(|| LedgerError::BatchNotFound(batch_no.clone()))?;
        mv(&mut batch, *qty)?;
        tx.save_batch(batch)?;
    }
    Ok(())
}

fn changed(reservation: &StockReservation, reason: Option<String>, now: DateTime<Utc>) -> ReservationChanged {
    ReservationChanged {
        reservation_id: reservation.id_typed(),
        sku: reservation.sku().clone(),
        quantity: reservation.quantity(),
        business_id: reservation.business_id().to_string(),
        batch_allocations: reservation.batch_allocations().clone(),
        reason,
        occurred_at: now,
    }
}
