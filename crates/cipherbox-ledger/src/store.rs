//! Storage abstraction for the reference ledger.
//!
//! Stores are synchronous: the ledger serializes access behind a mutex and
//! never holds a store across an await point.

use std::collections::HashMap;

use cipherbox_types::{
    Address, BoxId, BoxSeries, DecryptionRequest, RequestId, SeriesId, TxReceipt, Wei,
};

use crate::state_machine::BoxRecord;
use crate::Result;

/// Persistent ledger state.
pub trait LedgerStore: Send {
    fn load_box(&self, box_id: BoxId) -> Result<Option<BoxRecord>>;
    fn insert_box(&mut self, record: &BoxRecord) -> Result<()>;
    fn update_box(&mut self, record: &BoxRecord) -> Result<()>;
    /// Box ids owned by `owner`, ascending.
    fn box_ids_of(&self, owner: Address) -> Result<Vec<BoxId>>;
    /// Boxes in `PENDING_DECRYPT` or `DECRYPTING`, ascending.
    fn boxes_awaiting_decryption(&self) -> Result<Vec<BoxId>>;
    fn box_count(&self) -> Result<u64>;

    fn load_request(&self, request_id: RequestId) -> Result<Option<DecryptionRequest>>;
    fn insert_request(&mut self, request: &DecryptionRequest) -> Result<()>;
    fn update_request(&mut self, request: &DecryptionRequest) -> Result<()>;
    fn request_count(&self) -> Result<u64>;

    fn load_series(&self, series_id: SeriesId) -> Result<Option<BoxSeries>>;
    fn insert_series(&mut self, series: &BoxSeries) -> Result<()>;
    fn update_series(&mut self, series: &BoxSeries) -> Result<()>;
    fn series_count(&self) -> Result<u64>;

    /// Contract balance available for payouts.
    fn balance(&self) -> Result<Wei>;
    fn set_balance(&mut self, balance: Wei) -> Result<()>;

    /// Append a transaction receipt to the event log.
    fn record_receipt(&mut self, receipt: &TxReceipt) -> Result<()>;
    fn tx_count(&self) -> Result<u64>;

    /// Run `f` so that either all of its writes land or none do.
    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        f(self)
    }
}

/// In-memory store. Atomicity is a snapshot restored on error.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    boxes: HashMap<BoxId, BoxRecord>,
    requests: HashMap<RequestId, DecryptionRequest>,
    series: HashMap<SeriesId, BoxSeries>,
    balance: Wei,
    receipts: Vec<TxReceipt>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every receipt recorded so far, oldest first.
    pub fn receipts(&self) -> &[TxReceipt] {
        &self.receipts
    }
}

fn sorted(mut ids: Vec<BoxId>) -> Vec<BoxId> {
    ids.sort_unstable();
    ids
}

impl LedgerStore for MemoryStore {
    fn load_box(&self, box_id: BoxId) -> Result<Option<BoxRecord>> {
        Ok(self.boxes.get(&box_id).cloned())
    }

    fn insert_box(&mut self, record: &BoxRecord) -> Result<()> {
        self.boxes.insert(record.info.box_id, record.clone());
        Ok(())
    }

    fn update_box(&mut self, record: &BoxRecord) -> Result<()> {
        self.insert_box(record)
    }

    fn box_ids_of(&self, owner: Address) -> Result<Vec<BoxId>> {
        Ok(sorted(
            self.boxes
                .values()
                .filter(|r| r.info.owner == owner)
                .map(|r| r.info.box_id)
                .collect(),
        ))
    }

    fn boxes_awaiting_decryption(&self) -> Result<Vec<BoxId>> {
        Ok(sorted(
            self.boxes
                .values()
                .filter(|r| r.info.status.is_awaiting_decryption())
                .map(|r| r.info.box_id)
                .collect(),
        ))
    }

    fn box_count(&self) -> Result<u64> {
        Ok(self.boxes.len() as u64)
    }

    fn load_request(&self, request_id: RequestId) -> Result<Option<DecryptionRequest>> {
        Ok(self.requests.get(&request_id).cloned())
    }

    fn insert_request(&mut self, request: &DecryptionRequest) -> Result<()> {
        self.requests.insert(request.request_id, request.clone());
        Ok(())
    }

    fn update_request(&mut self, request: &DecryptionRequest) -> Result<()> {
        self.insert_request(request)
    }

    fn request_count(&self) -> Result<u64> {
        Ok(self.requests.len() as u64)
    }

    fn load_series(&self, series_id: SeriesId) -> Result<Option<BoxSeries>> {
        Ok(self.series.get(&series_id).cloned())
    }

    fn insert_series(&mut self, series: &BoxSeries) -> Result<()> {
        self.series.insert(series.id, series.clone());
        Ok(())
    }

    fn update_series(&mut self, series: &BoxSeries) -> Result<()> {
        self.insert_series(series)
    }

    fn series_count(&self) -> Result<u64> {
        Ok(self.series.len() as u64)
    }

    fn balance(&self) -> Result<Wei> {
        Ok(self.balance)
    }

    fn set_balance(&mut self, balance: Wei) -> Result<()> {
        self.balance = balance;
        Ok(())
    }

    fn record_receipt(&mut self, receipt: &TxReceipt) -> Result<()> {
        self.receipts.push(receipt.clone());
        Ok(())
    }

    fn tx_count(&self) -> Result<u64> {
        Ok(self.receipts.len() as u64)
    }

    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let snapshot = self.clone();
        let result = f(self);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use cipherbox_types::{BoxInfo, BoxStatus};

    use super::*;
    use crate::LedgerError;

    fn record(box_id: BoxId, owner: Address, status: BoxStatus) -> BoxRecord {
        BoxRecord {
            info: BoxInfo {
                box_id,
                series_id: 1,
                owner,
                status,
                revealed_prize_amount: None,
                purchase_time: 0,
                expires_at: None,
                current_request: None,
            },
            sealed_prize: 10,
            price_paid: 10,
        }
    }

    #[test]
    fn test_box_queries() {
        let alice = Address([0xaa; 20]);
        let bob = Address([0xbb; 20]);
        let mut store = MemoryStore::new();
        store
            .insert_box(&record(3, alice, BoxStatus::Decrypting))
            .expect("insert");
        store
            .insert_box(&record(1, alice, BoxStatus::Purchased))
            .expect("insert");
        store
            .insert_box(&record(2, bob, BoxStatus::PendingDecrypt))
            .expect("insert");

        assert_eq!(store.box_ids_of(alice).expect("owned"), vec![1, 3]);
        assert_eq!(store.boxes_awaiting_decryption().expect("awaiting"), vec![2, 3]);
        assert_eq!(store.box_count().expect("count"), 3);
    }

    #[test]
    fn test_atomically_rolls_back() {
        let mut store = MemoryStore::new();
        store.set_balance(100).expect("balance");

        let result: Result<()> = store.atomically(|s| {
            s.set_balance(0)?;
            Err(LedgerError::Storage("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.balance().expect("balance"), 100);

        store
            .atomically(|s| s.set_balance(50))
            .expect("commit");
        assert_eq!(store.balance().expect("balance"), 50);
    }
}
