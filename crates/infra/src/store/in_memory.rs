use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use batchledger_core::{AggregateRoot, BatchId, ExpectedVersion, ReservationId, TransferId};
use batchledger_inventory::{Batch, StockReservation, StockTransfer};

use super::r#trait::{
    BatchCriteria, ChangeSet, LedgerStore, ReservationCriteria, StoreError, sort_batches, sort_reservations,
};

#[derive(Debug, Default)]
struct Tables {
    batches: HashMap<BatchId, Batch>,
    batch_nos: BTreeMap<String, BatchId>,
    reservations: HashMap<ReservationId, StockReservation>,
    transfers: HashMap<TransferId, StockTransfer>,
    transfer_nos: BTreeMap<String, TransferId>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A commit validates the whole change set under the
/// write lock before applying any of it.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.batches.len())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

fn check_version(kind: &str, key: &str, expected: ExpectedVersion, current: Option<u64>) -> Result<(), StoreError> {
    let actual = current.unwrap_or(0);
    if !expected.matches(actual) {
        return Err(StoreError::Concurrency(format!(
            "{kind} {key}: expected {expected:?}, found {actual}"
        )));
    }
    Ok(())
}

impl LedgerStore for InMemoryLedgerStore {
    fn find_batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        Ok(self.read()?.batches.get(&id).cloned())
    }

    fn find_batch_by_no(&self, batch_no: &str) -> Result<Option<Batch>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .batch_nos
            .get(batch_no)
            .and_then(|id| tables.batches.get(id))
            .cloned())
    }

    fn find_batches(&self, criteria: &BatchCriteria) -> Result<Vec<Batch>, StoreError> {
        let mut out: Vec<Batch> = self
            .read()?
            .batches
            .values()
            .filter(|b| criteria.matches(b))
            .cloned()
            .collect();
        sort_batches(&mut out);
        Ok(out)
    }

    fn find_reservation(&self, id: ReservationId) -> Result<Option<StockReservation>, StoreError> {
        Ok(self.read()?.reservations.get(&id).cloned())
    }

    fn find_reservations(&self, criteria: &ReservationCriteria) -> Result<Vec<StockReservation>, StoreError> {
        let mut out: Vec<StockReservation> = self
            .read()?
            .reservations
            .values()
            .filter(|r| criteria.matches(r))
            .cloned()
            .collect();
        sort_reservations(&mut out);
        Ok(out)
    }

    fn find_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError> {
        Ok(self.read()?.transfers.get(&id).cloned())
    }

    fn find_transfer_by_no(&self, transfer_no: &str) -> Result<Option<StockTransfer>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .transfer_nos
            .get(transfer_no)
            .and_then(|id| tables.transfers.get(id))
            .cloned())
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        // Validate everything first; nothing is written unless all rows pass.
        for (batch, expected) in &changes.batches {
            let current = tables.batches.get(&batch.id_typed());
            check_version("batch", batch.batch_no(), *expected, current.map(Batch::version))?;
            if let Some(owner) = tables.batch_nos.get(batch.batch_no()) {
                if *owner != batch.id_typed() {
                    return Err(StoreError::DuplicateBatchNo(batch.batch_no().to_string()));
                }
            }
        }
        let mut seen_nos = BTreeMap::new();
        for (batch, _) in &changes.batches {
            if let Some(other) = seen_nos.insert(batch.batch_no(), batch.id_typed()) {
                if other != batch.id_typed() {
                    return Err(StoreError::DuplicateBatchNo(batch.batch_no().to_string()));
                }
            }
        }
        for (reservation, expected) in &changes.reservations {
            let current = tables.reservations.get(&reservation.id_typed());
            check_version(
                "reservation",
                &reservation.id_typed().to_string(),
                *expected,
                current.map(StockReservation::version),
            )?;
        }
        for (transfer, expected) in &changes.transfers {
            let current = tables.transfers.get(&transfer.id_typed());
            check_version(
                "transfer",
                transfer.transfer_no(),
                *expected,
                current.map(StockTransfer::version),
            )?;
            if let Some(owner) = tables.transfer_nos.get(transfer.transfer_no()) {
                if *owner != transfer.id_typed() {
                    return Err(StoreError::DuplicateTransferNo(transfer.transfer_no().to_string()));
                }
            }
        }

        for (mut batch, _) in changes.batches {
            let next = tables.batches.get(&batch.id_typed()).map_or(0, Batch::version) + 1;
            batch.set_version(next);
            tables.batch_nos.insert(batch.batch_no().to_string(), batch.id_typed());
            tables.batches.insert(batch.id_typed(), batch);
        }
        for (mut reservation, _) in changes.reservations {
            let next = tables
                .reservations
                .get(&reservation.id_typed())
                .map_or(0, StockReservation::version)
                + 1;
            reservation.set_version(next);
            tables.reservations.insert(reservation.id_typed(), reservation);
        }
        for (mut transfer, _) in changes.transfers {
            let next = tables.transfers.get(&transfer.id_typed()).map_or(0, StockTransfer::version) + 1;
            transfer.set_version(next);
            tables
                .transfer_nos
                .insert(transfer.transfer_no().to_string(), transfer.id_typed());
            tables.transfers.insert(transfer.id_typed(), transfer);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use batchledger_inventory::NewBatch;

    fn batch(no: &str) -> Batch {
        Batch::create(NewBatch::new(no, "SKU-1", 10, dec!(1), Utc::now())).unwrap()
    }

    fn insert(store: &InMemoryLedgerStore, b: Batch) -> Result<(), StoreError> {
        store.commit(ChangeSet {
            batches: vec![(b, ExpectedVersion::Exact(0))],
            ..ChangeSet::default()
        })
    }

    #[test]
    fn commit_bumps_the_stored_version() {
        let store = InMemoryLedgerStore::new();
        let b = batch("B1");
        insert(&store, b.clone()).unwrap();

        let stored = store.find_batch(b.id_typed()).unwrap().unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(store.find_batch_by_no("B1").unwrap().unwrap().id_typed(), b.id_typed());
    }

    #[test]
    fn stale_writes_are_rejected() {
        let store = InMemoryLedgerStore::new();
        let b = batch("B1");
        insert(&store, b.clone()).unwrap();

        let err = insert(&store, b.clone()).unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        let fresh = store.find_batch(b.id_typed()).unwrap().unwrap();
        store
            .commit(ChangeSet {
                batches: vec![(fresh, ExpectedVersion::Exact(1))],
                ..ChangeSet::default()
            })
            .unwrap();
        assert_eq!(store.find_batch(b.id_typed()).unwrap().unwrap().version(), 2);
    }

    #[test]
    fn a_failing_row_leaves_the_whole_change_set_unapplied() {
        let store = InMemoryLedgerStore::new();
        let existing = batch("B1");
        insert(&store, existing.clone()).unwrap();

        let newcomer = batch("B2");
        let err = store
            .commit(ChangeSet {
                batches: vec![
                    (newcomer.clone(), ExpectedVersion::Exact(0)),
                    (existing, ExpectedVersion::Exact(7)),
                ],
                ..ChangeSet::default()
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert!(store.find_batch(newcomer.id_typed()).unwrap().is_none());
        assert_eq!(store.batch_count().unwrap(), 1);
    }

    #[test]
    fn batch_numbers_are_unique() {
        let store = InMemoryLedgerStore::new();
        insert(&store, batch("B1")).unwrap();
        assert_eq!(
            insert(&store, batch("B1")).unwrap_err(),
            StoreError::DuplicateBatchNo("B1".into())
        );

        let err = store
            .commit(ChangeSet {
                batches: vec![
                    (batch("B2"), ExpectedVersion::Exact(0)),
                    (batch("B2"), ExpectedVersion::Exact(0)),
                ],
                ..ChangeSet::default()
            })
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateBatchNo("B2".into()));
    }

    #[test]
    fn queries_are_ordered_by_create_time_then_number() {
        let store = InMemoryLedgerStore::new();
        let t = Utc::now();
        for (no, offset) in [("C", 0), ("A", 5), ("B", 0)] {
            let b = Batch::create(NewBatch::new(no, "SKU-1", 1, dec!(1), t + chrono::Duration::seconds(offset))).unwrap();
            insert(&store, b).unwrap();
        }
        let nos: Vec<String> = store
            .find_batches(&BatchCriteria::for_sku("SKU-1"))
            .unwrap()
            .iter()
            .map(|b| b.batch_no().to_string())
            .collect();
        assert_eq!(nos, vec!["B", "C", "A"]);
    }
}
