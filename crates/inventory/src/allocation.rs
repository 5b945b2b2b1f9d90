//! Allocation planning: which batches satisfy a requested quantity.
//!
//! Planning is pure. Executing a plan is the caller's job: the infra
//! `AllocationEngine` applies contributions to freshly loaded batches inside
//! one transaction.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use batchledger_core::{BatchId, LedgerError, LedgerResult, LocationId, SkuRef, ValueObject};

use crate::batch::{Batch, BatchStatus};
use crate::strategy::AllocationStrategy;

/// Strategy label recorded on plans built from caller-chosen batches.
pub const MANUAL_STRATEGY: &str = "manual";

/// One batch's share of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub batch_id: BatchId,
    pub batch_no: String,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

impl ValueObject for Contribution {}

/// A computed, not-yet-applied assignment of quantity across batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub sku: SkuRef,
    pub requested_quantity: i64,
    pub strategy: String,
    pub contributions: Vec<Contribution>,
}

impl ValueObject for AllocationPlan {}

impl AllocationPlan {
    pub fn allocated_quantity(&self) -> i64 {
        self.contributions.iter().map(|c| c.quantity).sum()
    }

    pub fn total_cost(&self) -> Decimal {
        self.contributions
            .iter()
            .map(|c| Decimal::from(c.quantity) * c.unit_cost)
            .sum()
    }

    /// Weighted-average unit cost of the allocated units.
    pub fn weighted_unit_cost(&self) -> Decimal {
        let qty = self.allocated_quantity();
        if qty == 0 {
            return Decimal::ZERO;
        }
        (self.total_cost() / Decimal::from(qty)).round_dp(crate::batch::COST_SCALE)
    }

    /// `batch_no → quantity`, the shape reservations persist.
    pub fn batch_allocations(&self) -> BTreeMap<String, i64> {
        let mut out = BTreeMap::new();
        for c in &self.contributions {
            *out.entry(c.batch_no.clone()).or_insert(0) += c.quantity;
        }
        out
    }
}

/// Batches eligible for strategy allocation: same SKU, `available` status,
/// positive availability, and (when given) at `location`.
pub fn select_candidates(sku: &SkuRef, batches: &[Batch], location: Option<&LocationId>) -> Vec<Batch> {
    batches
        .iter()
        .filter(|b| b.sku() == sku && b.is_allocatable())
        .filter(|b| location.is_none_or(|loc| b.location_id() == Some(loc)))
        .cloned()
        .collect()
}

/// Plan `quantity` units of `sku` across `candidates` in strategy order.
pub fn plan_allocation(
    sku: &SkuRef,
    quantity: i64,
    strategy: &dyn AllocationStrategy,
    candidates: &[Batch],
) -> LedgerResult<AllocationPlan> {
    ensure_positive(quantity)?;

    let eligible = select_candidates(sku, candidates, None);
    if eligible.is_empty() {
        return Err(LedgerError::insufficient(sku.as_str(), quantity, 0));
    }

    let ordered = strategy.sort_batches(&eligible);
    greedy(sku, quantity, strategy.name(), &ordered)
}

/// Plan against caller-chosen batches, in the caller's order.
///
/// Every batch must belong to `sku` and be in `available` status; strategy
/// ordering is bypassed.
pub fn plan_from_batches(sku: &SkuRef, quantity: i64, batches: &[Batch]) -> LedgerResult<AllocationPlan> {
    ensure_positive(quantity)?;

    for b in batches {
        if b.sku() != sku {
            return Err(LedgerError::invalid_argument(format!(
                "batch {} belongs to sku {}, not {sku}",
                b.batch_no(),
                b.sku()
            )));
        }
        if b.status() != BatchStatus::Available {
            return Err(LedgerError::invalid_operation(format!(
                "batch {} is {} and cannot be allocated",
                b.batch_no(),
                b.status()
            )));
        }
    }

    greedy(sku, quantity, MANUAL_STRATEGY, batches)
}

fn ensure_positive(quantity: i64) -> LedgerResult<()> {
    if quantity <= 0 {
        return Err(LedgerError::invalid_argument(format!(
            "allocation quantity must be positive (got {quantity})"
        )));
    }
    Ok(())
}

fn greedy(sku: &SkuRef, quantity: i64, strategy: &str, ordered: &[Batch]) -> LedgerResult<AllocationPlan> {
    let mut remaining = quantity;
    let mut contributions = Vec::new();

    for b in ordered {
        if remaining == 0 {
            break;
        }
        let take = b.available_quantity().min(remaining);
        if take <= 0 {
            continue;
        }
        contributions.push(Contribution {
            batch_id: b.id_typed(),
            batch_no: b.batch_no().to_string(),
            quantity: take,
            unit_cost: b.unit_cost(),
        });
        remaining -= take;
    }

    if remaining > 0 {
        let available: i64 = ordered.iter().map(|b| b.available_quantity().max(0)).sum();
        return Err(LedgerError::insufficient(sku.as_str(), quantity, available));
    }

    Ok(AllocationPlan {
        sku: sku.clone(),
        requested_quantity: quantity,
        strategy: strategy.to_string(),
        contributions,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::batch::NewBatch;
    use crate::batch::test_support::{batch, t0};
    use crate::strategy::{Fifo, Lifo};

    fn sku() -> SkuRef {
        SkuRef::new("SKU-1")
    }

    #[test]
    fn fifo_plan_drains_oldest_batches_first() {
        let batches = vec![
            batch("NEW", 100, dec!(12), 20),
            batch("OLD", 60, dec!(10), 0),
            batch("MID", 50, dec!(11), 10),
        ];
        let plan = plan_allocation(&sku(), 100, &Fifo, &batches).unwrap();

        let shares: Vec<(&str, i64)> = plan
            .contributions
            .iter()
            .map(|c| (c.batch_no.as_str(), c.quantity))
            .collect();
        assert_eq!(shares, vec![("OLD", 60), ("MID", 40)]);
        assert_eq!(plan.allocated_quantity(), 100);
        assert_eq!(plan.strategy, "fifo");
        assert_eq!(plan.total_cost(), dec!(1040));
        assert_eq!(plan.weighted_unit_cost(), dec!(10.4));
    }

    #[test]
    fn lifo_plan_takes_newest_first() {
        let batches = vec![batch("OLD", 60, dec!(10), 0), batch("NEW", 100, dec!(12), 20)];
        let plan = plan_allocation(&sku(), 30, &Lifo, &batches).unwrap();
        assert_eq!(plan.contributions.len(), 1);
        assert_eq!(plan.contributions[0].batch_no, "NEW");
    }

    #[test]
    fn shortfall_reports_requested_and_available() {
        let batches = vec![batch("A", 60, dec!(1), 0), batch("B", 40, dec!(1), 1)];
        let err = plan_allocation(&sku(), 200, &Fifo, &batches).unwrap_err();
        assert_eq!(err, LedgerError::insufficient("SKU-1", 200, 100));
    }

    #[test]
    fn no_candidates_reports_zero_available() {
        let depleted = batch("A", 0, dec!(1), 0);
        let err = plan_allocation(&sku(), 5, &Fifo, &[depleted]).unwrap_err();
        assert_eq!(err, LedgerError::insufficient("SKU-1", 5, 0));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let batches = vec![batch("A", 10, dec!(1), 0)];
        for qty in [0, -3] {
            let err = plan_allocation(&sku(), qty, &Fifo, &batches).unwrap_err();
            assert!(matches!(err, LedgerError::InvalidArgument(_)));
        }
    }

    #[test]
    fn candidates_skip_other_skus_statuses_and_locations() {
        let here = Batch::create(NewBatch::new("HERE", "SKU-1", 5, dec!(1), t0()).at_location("WH-1")).unwrap();
        let there = Batch::create(NewBatch::new("THERE", "SKU-1", 5, dec!(1), t0()).at_location("WH-2")).unwrap();
        let other = Batch::create(NewBatch::new("OTHER", "SKU-2", 5, dec!(1), t0()).at_location("WH-1")).unwrap();
        let held = Batch::create(
            NewBatch::new("HELD", "SKU-1", 5, dec!(1), t0())
                .at_location("WH-1")
                .with_status(BatchStatus::Quarantined),
        )
        .unwrap();
        let all = vec![here, there, other, held];

        let wh1 = LocationId::new("WH-1");
        let picked = select_candidates(&sku(), &all, Some(&wh1));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].batch_no(), "HERE");
        assert_eq!(select_candidates(&sku(), &all, None).len(), 2);
    }

    #[test]
    fn manual_plan_respects_caller_order() {
        let a = batch("A", 10, dec!(1), 0);
        let b = batch("B", 10, dec!(2), 5);
        let plan = plan_from_batches(&sku(), 15, &[b, a]).unwrap();
        assert_eq!(plan.strategy, MANUAL_STRATEGY);
        assert_eq!(plan.batch_allocations(), BTreeMap::from([("A".to_string(), 5), ("B".to_string(), 10)]));
        assert_eq!(plan.contributions[0].batch_no, "B");
    }

    #[test]
    fn manual_plan_rejects_foreign_or_unavailable_batches() {
        let foreign = Batch::create(NewBatch::new("F", "SKU-9", 10, dec!(1), t0())).unwrap();
        assert!(matches!(
            plan_from_batches(&sku(), 1, &[foreign]),
            Err(LedgerError::InvalidArgument(_))
        ));
        let damaged = Batch::create(NewBatch::new("D", "SKU-1", 10, dec!(1), t0()).with_status(BatchStatus::Damaged)).unwrap();
        assert!(matches!(
            plan_from_batches(&sku(), 1, &[damaged]),
            Err(LedgerError::InvalidOperation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a successful plan allocates exactly the requested quantity
        /// and never takes more from a batch than it had available.
        #[test]
        fn successful_plans_conserve_quantity(
            sizes in prop::collection::vec(0i64..500, 1..12),
            requested in 1i64..3_000,
        ) {
            let batches: Vec<Batch> = sizes
                .iter()
                .enumerate()
                .map(|(idx, qty)| {
                    Batch::create(NewBatch::new(
                        format!("B{idx}"),
                        "SKU-1",
                        *qty,
                        dec!(3.5),
                        t0() + Duration::minutes(idx as i64),
                    ))
                    .unwrap()
                })
                .collect();
            let total: i64 = sizes.iter().sum();

            match plan_allocation(&sku(), requested, &Fifo, &batches) {
                Ok(plan) => {
                    prop_assert!(requested <= total);
                    prop_assert_eq!(plan.allocated_quantity(), requested);
                    for c in &plan.contributions {
                        let source = batches.iter().find(|b| b.id_typed() == c.batch_id).unwrap();
                        prop_assert!(c.quantity > 0);
                        prop_assert!(c.quantity <= source.available_quantity());
                    }
                }
                Err(LedgerError::InsufficientStock { required, available, .. }) => {
                    prop_assert!(requested > total);
                    prop_assert_eq!(required, requested);
                    prop_assert_eq!(available, total);
                }
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }
    }
}
