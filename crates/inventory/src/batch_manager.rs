//! Batch merge, split and inbound receipt.

use std::collections::BTreeSet;

use chrono::Utc;
use rust_decimal::Decimal;

use batchledger_core::{LedgerError, LedgerResult};

use crate::batch::{Batch, BatchStatus, COST_SCALE, NewBatch};

/// Combine compatible batches into a new one.
///
/// Sources must share SKU, quality level and location (both-absent counts as
/// a match), hold no reserved or locked stock, be distinct, and hold some
/// stock between them. They are left empty and `depleted`. The merged batch takes the earliest create time and
/// dates of its sources.
pub fn merge_batches(sources: &mut [Batch], new_batch_no: &str) -> LedgerResult<Batch> {
    if sources.len() < 2 {
        return Err(LedgerError::invalid_operation("merging needs at least two batches"));
    }

    let mut seen = BTreeSet::new();
    for b in sources.iter() {
        if !seen.insert(b.id_typed()) {
            return Err(LedgerError::invalid_operation(format!(
                "batch {} appears twice in the merge",
                b.batch_no()
            )));
        }
    }

    let first = &sources[0];
    for b in sources.iter().skip(1) {
        if b.sku() != first.sku() {
            return Err(LedgerError::invalid_operation(format!(
                "cannot merge batches of different skus ({} vs {})",
                first.sku(),
                b.sku()
            )));
        }
        if b.quality_level() != first.quality_level() {
            return Err(LedgerError::invalid_operation(format!(
                "cannot merge batches of different quality levels ({} vs {})",
                first.quality_level(),
                b.quality_level()
            )));
        }
        if b.location_id() != first.location_id() {
            return Err(LedgerError::invalid_operation(format!(
                "cannot merge batches at different locations ({:?} vs {:?})",
                first.location_id(),
                b.location_id()
            )));
        }
    }
    if let Some(busy) = sources
        .iter()
        .find(|b| b.reserved_quantity() > 0 || b.locked_quantity() > 0)
    {
        return Err(LedgerError::invalid_operation(format!(
            "batch {} has reserved or locked stock and cannot be merged",
            busy.batch_no()
        )));
    }

    let total_qty: i64 = sources.iter().map(Batch::quantity).sum();
    if total_qty == 0 {
        return Err(LedgerError::invalid_operation("merged batches hold no stock"));
    }
    let total_value: Decimal = sources.iter().map(Batch::stock_value).sum();
    let unit_cost = (total_value / Decimal::from(total_qty)).round_dp(COST_SCALE);

    let create_time = sources
        .iter()
        .map(Batch::create_time)
        .min()
        .unwrap_or_else(Utc::now);
    let first = &sources[0];
    let mut merged = NewBatch::new(new_batch_no, first.sku().clone(), total_qty, unit_cost, create_time)
        .with_quality(first.quality_level());
    merged.location_id = first.location_id().cloned();
    merged.expiry_date = sources.iter().filter_map(Batch::expiry_date).min();
    merged.production_date = sources.iter().filter_map(Batch::production_date).min();
    let merged = Batch::create(merged)?;

    for b in sources.iter_mut() {
        b.drain_into_merge()?;
    }
    Ok(merged)
}

/// Carve `split_qty` available units off `original` into a new batch.
pub fn split_batch(original: &mut Batch, split_qty: i64, new_batch_no: &str) -> LedgerResult<Batch> {
    if split_qty <= 0 || split_qty > original.quantity() {
        return Err(LedgerError::invalid_operation(format!(
            "split quantity {split_qty} is outside 1..={} for batch {}",
            original.quantity(),
            original.batch_no()
        )));
    }
    if original.available_quantity() < split_qty {
        return Err(LedgerError::insufficient(
            original.sku().as_str(),
            split_qty,
            original.available_quantity(),
        ));
    }

    let mut carved = NewBatch::new(
        new_batch_no,
        original.sku().clone(),
        split_qty,
        original.unit_cost(),
        original.create_time(),
    )
    .with_quality(original.quality_level());
    carved.location_id = original.location_id().cloned();
    carved.expiry_date = original.expiry_date();
    carved.production_date = original.production_date();
    let carved = Batch::create(carved)?;

    original.consume_available(split_qty)?;
    Ok(carved)
}

/// Receive `receipt.quantity` units into an existing batch with the same
/// batch number, re-averaging its cost.
pub fn receive_into(existing: &mut Batch, receipt: &NewBatch) -> LedgerResult<()> {
    if receipt.quantity <= 0 {
        return Err(LedgerError::invalid_argument(format!(
            "inbound quantity must be positive (got {})",
            receipt.quantity
        )));
    }
    if receipt.unit_cost < Decimal::ZERO {
        return Err(LedgerError::invalid_argument("inbound unit cost cannot be negative"));
    }
    if existing.sku() != &receipt.sku {
        return Err(LedgerError::invalid_operation(format!(
            "batch {} holds sku {}, cannot receive {}",
            existing.batch_no(),
            existing.sku(),
            receipt.sku
        )));
    }
    if matches!(existing.status(), BatchStatus::Damaged | BatchStatus::Expired) {
        return Err(LedgerError::invalid_operation(format!(
            "batch {} is {} and cannot receive stock",
            existing.batch_no(),
            existing.status()
        )));
    }

    existing.update_unit_cost(receipt.unit_cost, receipt.quantity);
    existing.credit(receipt.quantity)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::batch::test_support::{batch, partitioned, t0};

    #[test]
    fn merge_weights_cost_by_quantity() {
        let mut sources = vec![batch("A", 100, dec!(10.00), 5), batch("B", 150, dec!(12.00), 0)];
        let merged = merge_batches(&mut sources, "M1").unwrap();

        assert_eq!(merged.unit_cost(), dec!(11.20));
        assert_eq!(merged.quantity(), 250);
        assert_eq!(merged.available_quantity(), 250);
        assert_eq!(merged.batch_no(), "M1");
        assert_eq!(merged.create_time(), sources[1].create_time());
        for s in &sources {
            assert_eq!((s.quantity(), s.available_quantity()), (0, 0));
            assert_eq!(s.status(), BatchStatus::Depleted);
        }
    }

    #[test]
    fn merge_keeps_the_earliest_expiry() {
        let a = Batch::create(
            NewBatch::new("A", "SKU-1", 10, dec!(1), t0()).with_expiry(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()),
        )
        .unwrap();
        let b = Batch::create(
            NewBatch::new("B", "SKU-1", 10, dec!(1), t0()).with_expiry(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap()),
        )
        .unwrap();
        let merged = merge_batches(&mut [a, b], "M").unwrap();
        assert_eq!(merged.expiry_date(), NaiveDate::from_ymd_opt(2025, 5, 1));
    }

    #[test]
    fn merge_needs_two_batches() {
        let mut one = vec![batch("A", 1, dec!(1), 0)];
        assert!(matches!(merge_batches(&mut one, "M"), Err(LedgerError::InvalidOperation(_))));
    }

    #[test]
    fn merge_rejects_incompatible_batches_without_mutation() {
        let located = Batch::create(NewBatch::new("L", "SKU-1", 10, dec!(1), t0()).at_location("WH-1")).unwrap();
        let mut sources = vec![batch("A", 10, dec!(1), 0), located];
        let before = sources.clone();
        assert!(matches!(merge_batches(&mut sources, "M"), Err(LedgerError::InvalidOperation(_))));
        assert_eq!(sources, before);

        let premium = Batch::create(NewBatch::new("P", "SKU-1", 10, dec!(1), t0()).with_quality("premium")).unwrap();
        let mut sources = vec![batch("A", 10, dec!(1), 0), premium];
        assert!(merge_batches(&mut sources, "M").is_err());

        let other_sku = Batch::create(NewBatch::new("O", "SKU-2", 10, dec!(1), t0())).unwrap();
        let mut sources = vec![batch("A", 10, dec!(1), 0), other_sku];
        assert!(merge_batches(&mut sources, "M").is_err());
    }

    #[test]
    fn merge_rejects_batches_with_holds() {
        let mut sources = vec![partitioned("A", 5, 5, 0, 0), batch("B", 10, dec!(1), 1)];
        let err = merge_batches(&mut sources, "M").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidOperation(msg) if msg.contains("reserved or locked")));
    }

    #[test]
    fn merge_rejects_the_same_batch_twice() {
        let a = batch("A", 10, dec!(1), 0);
        let mut sources = vec![a.clone(), a];
        assert!(merge_batches(&mut sources, "M").is_err());
    }

    #[test]
    fn merging_only_empty_batches_is_rejected() {
        let mut sources = vec![batch("A", 0, dec!(1), 0), batch("B", 0, dec!(2), 1)];
        let before = sources.clone();
        let err = merge_batches(&mut sources, "M").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidOperation(msg) if msg.contains("no stock")));
        assert_eq!(sources, before);
    }

    #[test]
    fn split_moves_exact_quantities() {
        let mut original = partitioned("O", 180, 20, 0, 0);
        let carved = split_batch(&mut original, 80, "S1").unwrap();

        assert_eq!((carved.quantity(), carved.available_quantity()), (80, 80));
        assert_eq!((original.quantity(), original.available_quantity()), (120, 100));
        assert_eq!(carved.unit_cost(), original.unit_cost());
        assert_eq!(carved.create_time(), original.create_time());
    }

    #[test]
    fn split_bounds_and_availability() {
        let mut original = partitioned("O", 50, 50, 0, 0);
        for qty in [0, -1, 101] {
            assert!(matches!(
                split_batch(&mut original, qty, "S"),
                Err(LedgerError::InvalidOperation(_))
            ));
        }
        let err = split_batch(&mut original, 60, "S").unwrap_err();
        assert_eq!(err, LedgerError::insufficient("SKU-1", 60, 50));
    }

    #[test]
    fn splitting_everything_depletes_the_original() {
        let mut original = batch("O", 30, dec!(2), 0);
        split_batch(&mut original, 30, "S").unwrap();
        assert_eq!(original.status(), BatchStatus::Depleted);
    }

    #[test]
    fn receive_into_reaverages_cost_before_adding() {
        let mut existing = batch("B1", 100, dec!(10.00), 0);
        let receipt = NewBatch::new("B1", "SKU-1", 150, dec!(12.00), t0());
        receive_into(&mut existing, &receipt).unwrap();
        assert_eq!(existing.unit_cost(), dec!(11.20));
        assert_eq!(existing.quantity(), 250);
        assert_eq!(existing.available_quantity(), 250);
    }

    #[test]
    fn receive_into_rejects_a_foreign_sku() {
        let mut existing = batch("B1", 10, dec!(1), 0);
        let receipt = NewBatch::new("B1", "SKU-2", 5, dec!(1), t0());
        assert!(matches!(
            receive_into(&mut existing, &receipt),
            Err(LedgerError::InvalidOperation(_))
        ));
    }
}
