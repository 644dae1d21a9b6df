//! Contract-level values (balance).

use cipherbox_types::Wei;
use rusqlite::Connection;

use crate::{DbError, Result};

/// Contract balance in wei.
pub fn balance(conn: &Connection) -> Result<Wei> {
    let raw: String = conn
        .query_row(
            "SELECT value FROM ledger_meta WHERE key = 'balance'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("balance".into()),
            other => DbError::Sqlite(other),
        })?;
    raw.parse()
        .map_err(|e: std::num::ParseIntError| DbError::Serialization(e.to_string()))
}

pub fn set_balance(conn: &Connection, balance: Wei) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO ledger_meta (key, value) VALUES ('balance', ?1)",
        [balance.to_string()],
    )?;
    Ok(())
}
