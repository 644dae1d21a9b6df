//! Decryption request queries.

use cipherbox_types::{DecryptionRequest, RequestId};
use rusqlite::{Connection, OptionalExtension};

use super::parsed;
use crate::{DbError, Result};

const COLUMNS: &str =
    "request_id, box_id, requester, submitted_at, retry_count, processed, superseded";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DecryptionRequest> {
    Ok(DecryptionRequest {
        request_id: parsed(row, 0)?,
        box_id: row.get::<_, i64>(1)? as u64,
        requester: parsed(row, 2)?,
        submitted_at: row.get::<_, i64>(3)? as u64,
        retry_count: row.get(4)?,
        processed: row.get(5)?,
        superseded: row.get(6)?,
    })
}

pub fn insert(conn: &Connection, request: &DecryptionRequest) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO decryption_requests ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        rusqlite::params![
            request.request_id.to_string(),
            request.box_id as i64,
            request.requester.to_string(),
            request.submitted_at as i64,
            request.retry_count,
            request.processed,
            request.superseded,
        ],
    )?;
    Ok(())
}

/// Only the mutable flags change after insertion.
pub fn update(conn: &Connection, request: &DecryptionRequest) -> Result<()> {
    let updated = conn.execute(
        "UPDATE decryption_requests SET retry_count = ?2, processed = ?3, superseded = ?4
         WHERE request_id = ?1",
        rusqlite::params![
            request.request_id.to_string(),
            request.retry_count,
            request.processed,
            request.superseded,
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!(
            "decryption request {}",
            request.request_id
        )));
    }
    Ok(())
}

pub fn get(conn: &Connection, request_id: RequestId) -> Result<Option<DecryptionRequest>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM decryption_requests WHERE request_id = ?1"),
            [request_id.to_string()],
            from_row,
        )
        .optional()?)
}

pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM decryption_requests", [], |row| {
        row.get(0)
    })?;
    Ok(n as u64)
}

/// Requests of a box that have not been superseded.
pub fn live_for_box(conn: &Connection, box_id: u64) -> Result<Vec<DecryptionRequest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM decryption_requests WHERE box_id = ?1 AND superseded = 0"
    ))?;
    let rows = stmt
        .query_map([box_id as i64], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use cipherbox_ledger::BoxRecord;
    use cipherbox_types::{Address, BoxInfo, BoxSeries, BoxStatus};

    use super::*;

    fn test_db() -> Connection {
        let conn = crate::open_memory().expect("open test db");
        crate::queries::series::insert(
            &conn,
            &BoxSeries {
                id: 1,
                name: "Genesis".to_string(),
                price: 100,
                total_boxes: 1,
                remaining_boxes: 0,
                creator: Address::ZERO,
                is_active: true,
            },
        )
        .expect("series");
        crate::queries::boxes::insert(
            &conn,
            &BoxRecord {
                info: BoxInfo {
                    box_id: 1,
                    series_id: 1,
                    owner: Address::ZERO,
                    status: BoxStatus::PendingDecrypt,
                    revealed_prize_amount: None,
                    purchase_time: 0,
                    expires_at: Some(3_600),
                    current_request: Some(RequestId::from_u64(1)),
                },
                sealed_prize: 120,
                price_paid: 100,
            },
        )
        .expect("box");
        conn
    }

    fn request(id: u64) -> DecryptionRequest {
        DecryptionRequest {
            request_id: RequestId::from_u64(id),
            box_id: 1,
            requester: Address::ZERO,
            submitted_at: 0,
            retry_count: 0,
            processed: false,
            superseded: false,
        }
    }

    #[test]
    fn test_supersede_leaves_one_live() {
        let conn = test_db();
        let mut first = request(1);
        insert(&conn, &first).expect("insert");
        first.superseded = true;
        update(&conn, &first).expect("supersede");
        let mut second = request(2);
        second.retry_count = 1;
        insert(&conn, &second).expect("insert");

        let live = live_for_box(&conn, 1).expect("live");
        assert_eq!(live, vec![second]);
        assert_eq!(count(&conn).expect("count"), 2);
        assert!(get(&conn, RequestId::from_u64(1)).expect("get").expect("exists").superseded);
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let conn = test_db();
        insert(&conn, &request(1)).expect("insert");
        assert!(insert(&conn, &request(1)).is_err());
    }
}
