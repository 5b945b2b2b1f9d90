//! Unit of work over a [`LedgerStore`].
//!
//! Reads go through a staging overlay, so a service sees its own writes.
//! Nothing reaches the store until the owning context commits the change
//! set; dropping a transaction discards it.

use std::collections::BTreeMap;

use batchledger_core::{AggregateRoot, BatchId, ExpectedVersion, LedgerError, LedgerResult, ReservationId, TransferId};
use batchledger_inventory::{Batch, StockEvent, StockReservation, StockTransfer};

use super::r#trait::{BatchCriteria, ChangeSet, LedgerStore, ReservationCriteria, sort_batches, sort_reservations};

#[derive(Debug)]
struct Staged<T> {
    value: T,
    /// Version the row had when first read (0 for inserts).
    base: u64,
    dirty: bool,
}

impl<T: AggregateRoot + Clone> Staged<T> {
    fn clean(value: T) -> Self {
        let base = value.version();
        Self {
            value,
            base,
            dirty: false,
        }
    }

    fn write(&mut self, mut value: T) {
        value.set_version(self.base + 1);
        self.value = value;
        self.dirty = true;
    }
}

fn stage_write<K: Ord, T: AggregateRoot + Clone>(map: &mut BTreeMap<K, Staged<T>>, key: K, value: T, base: u64) {
    map.entry(key)
        .or_insert_with(|| Staged {
            value: value.clone(),
            base,
            dirty: false,
        })
        .write(value);
}

fn drain_dirty<K, T>(map: BTreeMap<K, Staged<T>>) -> Vec<(T, ExpectedVersion)> {
    map.into_values()
        .filter(|s| s.dirty)
        .map(|s| (s.value, ExpectedVersion::Exact(s.base)))
        .collect()
}

pub struct Transaction<'s> {
    store: &'s dyn LedgerStore,
    batches: BTreeMap<BatchId, Staged<Batch>>,
    reservations: BTreeMap<ReservationId, Staged<StockReservation>>,
    transfers: BTreeMap<TransferId, Staged<StockTransfer>>,
    events: Vec<StockEvent>,
}

impl<'s> Transaction<'s> {
    pub fn new(store: &'s dyn LedgerStore) -> Self {
        Self {
            store,
            batches: BTreeMap::new(),
            reservations: BTreeMap::new(),
            transfers: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn batch(&mut self, id: BatchId) -> LedgerResult<Batch> {
        if let Some(staged) = self.batches.get(&id) {
            return Ok(staged.value.clone());
        }
        let batch = self
            .store
            .find_batch(id)?
            .ok_or_else(|| LedgerError::BatchNotFound(id.to_string()))?;
        self.batches.insert(id, Staged::clean(batch.clone()));
        Ok(batch)
    }

    pub fn batch_by_no(&mut self, batch_no: &str) -> LedgerResult<Option<Batch>> {
        if let Some(staged) = self.batches.values().find(|s| s.value.batch_no() == batch_no) {
            return Ok(Some(staged.value.clone()));
        }
        match self.store.find_batch_by_no(batch_no)? {
            Some(batch) => {
                let staged = self
                    .batches
                    .entry(batch.id_typed())
                    .or_insert_with(|| Staged::clean(batch));
                Ok(Some(staged.value.clone()))
            }
            None => Ok(None),
        }
    }

    /// Batches matching `criteria`, including this transaction's own writes,
    /// in create-time order.
    pub fn batches(&mut self, criteria: &BatchCriteria) -> LedgerResult<Vec<Batch>> {
        for batch in self.store.find_batches(criteria)? {
            self.batches
                .entry(batch.id_typed())
                .or_insert_with(|| Staged::clean(batch));
        }
        let mut out: Vec<Batch> = self
            .batches
            .values()
            .filter(|s| criteria.matches(&s.value))
            .map(|s| s.value.clone())
            .collect();
        sort_batches(&mut out);
        Ok(out)
    }

    /// Stage an updated batch. The counter partition must hold.
    pub fn save_batch(&mut self, batch: Batch) -> LedgerResult<()> {
        batch.assert_invariants();
        let base = batch.version();
        stage_write(&mut self.batches, batch.id_typed(), batch, base);
        Ok(())
    }

    pub fn insert_batch(&mut self, batch: Batch) -> LedgerResult<()> {
        if self.batch_by_no(batch.batch_no())?.is_some() {
            return Err(LedgerError::DuplicateBatchNo(batch.batch_no().to_string()));
        }
        if self.batches.contains_key(&batch.id_typed()) {
            return Err(LedgerError::invalid_operation(format!(
                "batch {} is already staged",
                batch.id_typed()
            )));
        }
        batch.assert_invariants();
        stage_write(&mut self.batches, batch.id_typed(), batch, 0);
        Ok(())
    }

    pub fn reservation(&mut self, id: ReservationId) -> LedgerResult<StockReservation> {
        if let Some(staged) = self.reservations.get(&id) {
            return Ok(staged.value.clone());
        }
        let reservation = self
            .store
            .find_reservation(id)?
            .ok_or_else(|| LedgerError::ReservationNotFound(id.to_string()))?;
        self.reservations.insert(id, Staged::clean(reservation.clone()));
        Ok(reservation)
    }

    pub fn reservations(&mut self, criteria: &ReservationCriteria) -> LedgerResult<Vec<StockReservation>> {
        for reservation in self.store.find_reservations(criteria)? {
            self.reservations
                .entry(reservation.id_typed())
                .or_insert_with(|| Staged::clean(reservation));
        }
        let mut out: Vec<StockReservation> = self
            .reservations
            .values()
            .filter(|s| criteria.matches(&s.value))
            .map(|s| s.value.clone())
            .collect();
        sort_reservations(&mut out);
        Ok(out)
    }

    pub fn save_reservation(&mut self, reservation: StockReservation) -> LedgerResult<()> {
        let base = reservation.version();
        stage_write(&mut self.reservations, reservation.id_typed(), reservation, base);
        Ok(())
    }

    pub fn insert_reservation(&mut self, reservation: StockReservation) -> LedgerResult<()> {
        if self.reservations.contains_key(&reservation.id_typed()) {
            return Err(LedgerError::invalid_operation(format!(
                "reservation {} is already staged",
                reservation.id_typed()
            )));
        }
        stage_write(&mut self.reservations, reservation.id_typed(), reservation, 0);
        Ok(())
    }

    pub fn transfer(&mut self, id: TransferId) -> LedgerResult<StockTransfer> {
        if let Some(staged) = self.transfers.get(&id) {
            return Ok(staged.value.clone());
        }
        let transfer = self
            .store
            .find_transfer(id)?
            .ok_or_else(|| LedgerError::TransferNotFound(id.to_string()))?;
        self.transfers.insert(id, Staged::clean(transfer.clone()));
        Ok(transfer)
    }

    pub fn transfer_by_no(&mut self, transfer_no: &str) -> LedgerResult<Option<StockTransfer>> {
        if let Some(staged) = self.transfers.values().find(|s| s.value.transfer_no() == transfer_no) {
            return Ok(Some(staged.value.clone()));
        }
        match self.store.find_transfer_by_no(transfer_no)? {
            Some(transfer) => {
                let staged = self
                    .transfers
                    .entry(transfer.id_typed())
                    .or_insert_with(|| Staged::clean(transfer));
                Ok(Some(staged.value.clone()))
            }
            None => Ok(None),
        }
    }

    pub fn save_transfer(&mut self, transfer: StockTransfer) -> LedgerResult<()> {
        let base = transfer.version();
        stage_write(&mut self.transfers, transfer.id_typed(), transfer, base);
        Ok(())
    }

    pub fn insert_transfer(&mut self, transfer: StockTransfer) -> LedgerResult<()> {
        if self.transfer_by_no(transfer.transfer_no())?.is_some() {
            return Err(LedgerError::DuplicateTransferNo(transfer.transfer_no().to_string()));
        }
        stage_write(&mut self.transfers, transfer.id_typed(), transfer, 0);
        Ok(())
    }

    /// Queue an event for emission once the commit succeeds.
    pub fn record(&mut self, event: StockEvent) {
        self.events.push(event);
    }

    pub fn into_parts(self) -> (ChangeSet, Vec<StockEvent>) {
        let changes = ChangeSet {
            batches: drain_dirty(self.batches),
            reservations: drain_dirty(self.reservations),
            transfers: drain_dirty(self.transfers),
        };
        (changes, self.events)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::store::InMemoryLedgerStore;
    use batchledger_inventory::NewBatch;

    fn seeded() -> (InMemoryLedgerStore, Batch) {
        let store = InMemoryLedgerStore::new();
        let b = Batch::create(NewBatch::new("B1", "SKU-1", 10, dec!(1), Utc::now())).unwrap();
        let mut tx = Transaction::new(&store);
        tx.insert_batch(b.clone()).unwrap();
        let (changes, _) = tx.into_parts();
        store.commit(changes).unwrap();
        let stored = store.find_batch(b.id_typed()).unwrap().unwrap();
        (store, stored)
    }

    #[test]
    fn reads_see_staged_writes_but_the_store_does_not() {
        let (store, b) = seeded();
        let mut tx = Transaction::new(&store);

        let mut staged = tx.batch(b.id_typed()).unwrap();
        staged.lock(4).unwrap();
        tx.save_batch(staged).unwrap();

        assert_eq!(tx.batch(b.id_typed()).unwrap().locked_quantity(), 4);
        assert_eq!(store.find_batch(b.id_typed()).unwrap().unwrap().locked_quantity(), 0);

        drop(tx);
        assert_eq!(store.find_batch(b.id_typed()).unwrap().unwrap().locked_quantity(), 0);
    }

    #[test]
    fn repeated_saves_keep_the_original_expected_version() {
        let (store, b) = seeded();
        let mut tx = Transaction::new(&store);
        for _ in 0..3 {
            let mut staged = tx.batch(b.id_typed()).unwrap();
            staged.lock(1).unwrap();
            tx.save_batch(staged).unwrap();
        }
        let (changes, _) = tx.into_parts();
        assert_eq!(changes.batches.len(), 1);
        assert_eq!(changes.batches[0].1, ExpectedVersion::Exact(1));
        store.commit(changes).unwrap();

        let stored = store.find_batch(b.id_typed()).unwrap().unwrap();
        assert_eq!((stored.locked_quantity(), stored.version()), (3, 2));
    }

    #[test]
    fn queries_merge_inserted_and_modified_rows() {
        let (store, b) = seeded();
        let mut tx = Transaction::new(&store);

        let extra = Batch::create(NewBatch::new("B2", "SKU-1", 5, dec!(1), Utc::now())).unwrap();
        tx.insert_batch(extra).unwrap();
        let mut emptied = tx.batch(b.id_typed()).unwrap();
        emptied.consume_available(10).unwrap();
        tx.save_batch(emptied).unwrap();

        let available = tx
            .batches(&BatchCriteria::for_sku("SKU-1").available_only())
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].batch_no(), "B2");
        assert_eq!(tx.batches(&BatchCriteria::for_sku("SKU-1")).unwrap().len(), 2);
    }

    #[test]
    fn inserting_a_taken_batch_number_fails_early() {
        let (store, _) = seeded();
        let mut tx = Transaction::new(&store);
        let dup = Batch::create(NewBatch::new("B1", "SKU-1", 1, dec!(1), Utc::now())).unwrap();
        assert_eq!(
            tx.insert_batch(dup).unwrap_err(),
            LedgerError::DuplicateBatchNo("B1".into())
        );
    }

    #[test]
    fn missing_rows_surface_typed_not_found_errors() {
        let store = InMemoryLedgerStore::new();
        let mut tx = Transaction::new(&store);
        assert!(matches!(tx.batch(BatchId::new()), Err(LedgerError::BatchNotFound(_))));
        assert!(matches!(
            tx.reservation(ReservationId::new()),
            Err(LedgerError::ReservationNotFound(_))
        ));
        assert!(matches!(tx.transfer(TransferId::new()), Err(LedgerError::TransferNotFound(_))));
    }
}
