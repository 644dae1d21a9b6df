//! Transaction receipt log.

use cipherbox_types::{EventLog, TxHash, TxReceipt};
use rusqlite::Connection;

use super::parsed;
use crate::{DbError, Result};

pub fn record(conn: &Connection, receipt: &TxReceipt) -> Result<()> {
    let logs = serde_json::to_string(&receipt.logs)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO tx_receipts (tx_hash, block_time, logs) VALUES (?1, ?2, ?3)",
        rusqlite::params![receipt.tx_hash.to_string(), receipt.block_time as i64, logs],
    )?;
    Ok(())
}

pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM tx_receipts", [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Most recent receipts first.
pub fn recent(conn: &Connection, limit: u32) -> Result<Vec<TxReceipt>> {
    let mut stmt = conn.prepare(
        "SELECT tx_hash, block_time, logs FROM tx_receipts ORDER BY seq DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            Ok((
                parsed::<TxHash>(row, 0)?,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(tx_hash, block_time, logs)| {
            let logs: Vec<EventLog> = serde_json::from_str(&logs)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            Ok(TxReceipt {
                tx_hash,
                block_time,
                logs,
            })
        })
        .collect()
}
