//! Box series queries.

use cipherbox_types::{BoxSeries, SeriesId};
use rusqlite::{Connection, OptionalExtension};

use super::parsed;
use crate::{DbError, Result};

const COLUMNS: &str =
    "series_id, name, price, total_boxes, remaining_boxes, creator, is_active";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BoxSeries> {
    Ok(BoxSeries {
        id: row.get::<_, i64>(0)? as SeriesId,
        name: row.get(1)?,
        price: parsed(row, 2)?,
        total_boxes: row.get(3)?,
        remaining_boxes: row.get(4)?,
        creator: parsed(row, 5)?,
        is_active: row.get(6)?,
    })
}

pub fn insert(conn: &Connection, series: &BoxSeries) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO series ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        rusqlite::params![
            series.id as i64,
            series.name,
            series.price.to_string(),
            series.total_boxes,
            series.remaining_boxes,
            series.creator.to_string(),
            series.is_active,
        ],
    )?;
    Ok(())
}

pub fn update(conn: &Connection, series: &BoxSeries) -> Result<()> {
    let updated = conn.execute(
        "UPDATE series SET name = ?2, price = ?3, total_boxes = ?4, remaining_boxes = ?5,
         creator = ?6, is_active = ?7 WHERE series_id = ?1",
        rusqlite::params![
            series.id as i64,
            series.name,
            series.price.to_string(),
            series.total_boxes,
            series.remaining_boxes,
            series.creator.to_string(),
            series.is_active,
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("series {}", series.id)));
    }
    Ok(())
}

pub fn get(conn: &Connection, series_id: SeriesId) -> Result<Option<BoxSeries>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM series WHERE series_id = ?1"),
            [series_id as i64],
            from_row,
        )
        .optional()?)
}

pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM series", [], |row| row.get(0))?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use cipherbox_types::{Address, WEI_PER_ETH};

    use super::*;

    fn series() -> BoxSeries {
        BoxSeries {
            id: 1,
            name: "Genesis".to_string(),
            price: WEI_PER_ETH / 100,
            total_boxes: 10,
            remaining_boxes: 10,
            creator: Address([0x0f; 20]),
            is_active: true,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = crate::open_memory().expect("open");
        insert(&conn, &series()).expect("insert");
        assert_eq!(get(&conn, 1).expect("get"), Some(series()));
        assert_eq!(get(&conn, 2).expect("get"), None);
        assert_eq!(count(&conn).expect("count"), 1);
    }

    #[test]
    fn test_update_missing_series() {
        let conn = crate::open_memory().expect("open");
        assert!(matches!(update(&conn, &series()), Err(DbError::NotFound(_))));
    }
}
