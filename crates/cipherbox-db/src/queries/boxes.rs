//! Box queries.

use cipherbox_ledger::BoxRecord;
use cipherbox_types::{Address, BoxId, BoxInfo, BoxStatus};
use rusqlite::{Connection, OptionalExtension};

use super::{parsed, parsed_opt};
use crate::{DbError, Result};

const COLUMNS: &str = "box_id, series_id, owner, status, revealed_prize_amount, purchase_time,
     expires_at, current_request, sealed_prize, price_paid";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BoxRecord> {
    Ok(BoxRecord {
        info: BoxInfo {
            box_id: row.get::<_, i64>(0)? as BoxId,
            series_id: row.get::<_, i64>(1)? as u64,
            owner: parsed(row, 2)?,
            status: parsed(row, 3)?,
            revealed_prize_amount: parsed_opt(row, 4)?,
            purchase_time: row.get::<_, i64>(5)? as u64,
            expires_at: row.get::<_, Option<i64>>(6)?.map(|t| t as u64),
            current_request: parsed_opt(row, 7)?,
        },
        sealed_prize: parsed(row, 8)?,
        price_paid: parsed(row, 9)?,
    })
}

fn params(record: &BoxRecord) -> [Box<dyn rusqlite::ToSql + '_>; 10] {
    let info = &record.info;
    [
        Box::new(info.box_id as i64),
        Box::new(info.series_id as i64),
        Box::new(info.owner.to_string()),
        Box::new(info.status.as_str()),
        Box::new(info.revealed_prize_amount.map(|v| v.to_string())),
        Box::new(info.purchase_time as i64),
        Box::new(info.expires_at.map(|t| t as i64)),
        Box::new(info.current_request.map(|r| r.to_string())),
        Box::new(record.sealed_prize.to_string()),
        Box::new(record.price_paid.to_string()),
    ]
}

pub fn insert(conn: &Connection, record: &BoxRecord) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO boxes ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        rusqlite::params_from_iter(params(record).iter()),
    )?;
    Ok(())
}

pub fn update(conn: &Connection, record: &BoxRecord) -> Result<()> {
    let updated = conn.execute(
        "UPDATE boxes SET series_id = ?2, owner = ?3, status = ?4, revealed_prize_amount = ?5,
         purchase_time = ?6, expires_at = ?7, current_request = ?8, sealed_prize = ?9,
         price_paid = ?10 WHERE box_id = ?1",
        rusqlite::params_from_iter(params(record).iter()),
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("box {}", record.info.box_id)));
    }
    Ok(())
}

pub fn get(conn: &Connection, box_id: BoxId) -> Result<Option<BoxRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM boxes WHERE box_id = ?1"),
            [box_id as i64],
            from_row,
        )
        .optional()?)
}

fn ids(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<BoxId>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, i64>(0).map(|id| id as BoxId))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn ids_by_owner(conn: &Connection, owner: Address) -> Result<Vec<BoxId>> {
    ids(
        conn,
        "SELECT box_id FROM boxes WHERE owner = ?1 ORDER BY box_id",
        [owner.to_string()],
    )
}

/// Boxes with an outstanding decryption request.
pub fn awaiting_decryption(conn: &Connection) -> Result<Vec<BoxId>> {
    ids(
        conn,
        "SELECT box_id FROM boxes WHERE status IN (?1, ?2) ORDER BY box_id",
        [
            BoxStatus::PendingDecrypt.as_str(),
            BoxStatus::Decrypting.as_str(),
        ],
    )
}

pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM boxes", [], |row| row.get(0))?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use cipherbox_types::{BoxSeries, RequestId};

    use super::*;

    const ALICE: Address = Address([0xa1; 20]);

    fn test_db() -> Connection {
        let conn = crate::open_memory().expect("open test db");
        crate::queries::series::insert(
            &conn,
            &BoxSeries {
                id: 1,
                name: "Genesis".to_string(),
                price: 100,
                total_boxes: 5,
                remaining_boxes: 5,
                creator: ALICE,
                is_active: true,
            },
        )
        .expect("series");
        conn
    }

    fn record(box_id: BoxId, status: BoxStatus) -> BoxRecord {
        BoxRecord {
            info: BoxInfo {
                box_id,
                series_id: 1,
                owner: ALICE,
                status,
                revealed_prize_amount: None,
                purchase_time: 1_000,
                expires_at: None,
                current_request: None,
            },
            sealed_prize: u128::from(u64::MAX) + 7,
            price_paid: 100,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = test_db();
        let rec = record(1, BoxStatus::Purchased);
        insert(&conn, &rec).expect("insert");
        assert_eq!(get(&conn, 1).expect("get"), Some(rec));
        assert_eq!(get(&conn, 2).expect("get"), None);
    }

    #[test]
    fn test_update_roundtrips_optional_fields() {
        let conn = test_db();
        let mut rec = record(1, BoxStatus::Purchased);
        insert(&conn, &rec).expect("insert");

        rec.info.status = BoxStatus::Opened;
        rec.info.revealed_prize_amount = Some(150);
        rec.info.expires_at = Some(4_600);
        rec.info.current_request = Some(RequestId::from_u64(3));
        update(&conn, &rec).expect("update");
        assert_eq!(get(&conn, 1).expect("get"), Some(rec));
    }

    #[test]
    fn test_awaiting_decryption() {
        let conn = test_db();
        insert(&conn, &record(1, BoxStatus::Purchased)).expect("insert");
        insert(&conn, &record(2, BoxStatus::Decrypting)).expect("insert");
        insert(&conn, &record(3, BoxStatus::PendingDecrypt)).expect("insert");
        insert(&conn, &record(4, BoxStatus::Expired)).expect("insert");

        assert_eq!(awaiting_decryption(&conn).expect("awaiting"), vec![2, 3]);
        assert_eq!(ids_by_owner(&conn, ALICE).expect("owned"), vec![1, 2, 3, 4]);
        assert_eq!(count(&conn).expect("count"), 4);
    }

    #[test]
    fn test_unknown_series_rejected() {
        let conn = test_db();
        let mut rec = record(1, BoxStatus::Purchased);
        rec.info.series_id = 99;
        assert!(insert(&conn, &rec).is_err());
    }
}
