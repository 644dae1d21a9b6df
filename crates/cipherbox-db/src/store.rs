//! [`LedgerStore`] over a SQLite connection.

use std::path::Path;

use cipherbox_ledger::{BoxRecord, LedgerError, LedgerStore};
use cipherbox_types::{
    Address, BoxId, BoxSeries, DecryptionRequest, RequestId, SeriesId, TxReceipt, Wei,
};
use rusqlite::Connection;

use crate::queries::{boxes, meta, receipts, requests, series};

type LedgerResult<T> = cipherbox_ledger::Result<T>;

/// Durable ledger state for one contract deployment.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> crate::Result<Self> {
        Ok(Self {
            conn: crate::open(path)?,
        })
    }

    pub fn open_memory() -> crate::Result<Self> {
        Ok(Self {
            conn: crate::open_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Most recent receipts first.
    pub fn recent_receipts(&self, limit: u32) -> crate::Result<Vec<TxReceipt>> {
        receipts::recent(&self.conn, limit)
    }
}

impl LedgerStore for SqliteStore {
    fn load_box(&self, box_id: BoxId) -> LedgerResult<Option<BoxRecord>> {
        Ok(boxes::get(&self.conn, box_id)?)
    }

    fn insert_box(&mut self, record: &BoxRecord) -> LedgerResult<()> {
        Ok(boxes::insert(&self.conn, record)?)
    }

    fn update_box(&mut self, record: &BoxRecord) -> LedgerResult<()> {
        Ok(boxes::update(&self.conn, record)?)
    }

    fn box_ids_of(&self, owner: Address) -> LedgerResult<Vec<BoxId>> {
        Ok(boxes::ids_by_owner(&self.conn, owner)?)
    }

    fn boxes_awaiting_decryption(&self) -> LedgerResult<Vec<BoxId>> {
        Ok(boxes::awaiting_decryption(&self.conn)?)
    }

    fn box_count(&self) -> LedgerResult<u64> {
        Ok(boxes::count(&self.conn)?)
    }

    fn load_request(&self, request_id: RequestId) -> LedgerResult<Option<DecryptionRequest>> {
        Ok(requests::get(&self.conn, request_id)?)
    }

    fn insert_request(&mut self, request: &DecryptionRequest) -> LedgerResult<()> {
        Ok(requests::insert(&self.conn, request)?)
    }

    fn update_request(&mut self, request: &DecryptionRequest) -> LedgerResult<()> {
        Ok(requests::update(&self.conn, request)?)
    }

    fn request_count(&self) -> LedgerResult<u64> {
        Ok(requests::count(&self.conn)?)
    }

    fn load_series(&self, series_id: SeriesId) -> LedgerResult<Option<BoxSeries>> {
        Ok(series::get(&self.conn, series_id)?)
    }

    fn insert_series(&mut self, new_series: &BoxSeries) -> LedgerResult<()> {
        Ok(series::insert(&self.conn, new_series)?)
    }

    fn update_series(&mut self, changed: &BoxSeries) -> LedgerResult<()> {
        Ok(series::update(&self.conn, changed)?)
    }

    fn series_count(&self) -> LedgerResult<u64> {
        Ok(series::count(&self.conn)?)
    }

    fn balance(&self) -> LedgerResult<Wei> {
        Ok(meta::balance(&self.conn)?)
    }

    fn set_balance(&mut self, balance: Wei) -> LedgerResult<()> {
        Ok(meta::set_balance(&self.conn, balance)?)
    }

    fn record_receipt(&mut self, receipt: &TxReceipt) -> LedgerResult<()> {
        Ok(receipts::record(&self.conn, receipt)?)
    }

    fn tx_count(&self) -> LedgerResult<u64> {
        Ok(receipts::count(&self.conn)?)
    }

    fn atomically<T, F>(&mut self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Self) -> LedgerResult<T>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        match f(self) {
            Ok(value) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| LedgerError::Storage(e.to_string()))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    tracing::error!(error = %rollback, "ledger rollback failed");
                }
                Err(err)
            }
        }
    }
}
