use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::filter::RecetaFilter;

/// One scanned prescription record as persisted.
///
/// `numero` is the raw scanned code and may contain OCR noise; the branch is
/// kept as the scanned text (the typed layers bind canonical integer text
/// when filtering). Records are read-only inputs to the normalizer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Receta {
    pub numero: String,
    pub fechacreacion: NaiveDate,
    pub sucursal: String,
}

/// One lote group: every record sharing an exact `(branch, date)` pair.
#[derive(Debug, Clone, Serialize)]
pub struct LoteSummary {
    pub sucursal: String,
    pub fechacreacion: NaiveDate,
    pub cantidad: i64,
}

/// Per-day record counts, split by category prefix.
#[derive(Debug, Clone, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub total: i64,
    pub apross: i64,
    pub pami: i64,
}

/// Overall record counts for a filtered range, split by category prefix.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryTotals {
    pub total: i64,
    pub apross: i64,
    pub pami: i64,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recetas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            numero TEXT NOT NULL,
            fechacreacion TEXT NOT NULL,
            sucursal TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recetas_fecha ON recetas(fechacreacion)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recetas_sucursal ON recetas(sucursal)",
        [],
    )?;

    Ok(())
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<Receta>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut recetas = Vec::new();
    for result in rdr.deserialize() {
        let receta: Receta = result.context("Failed to deserialize receta row")?;
        recetas.push(receta);
    }

    Ok(recetas)
}

pub fn insert_recetas(conn: &Connection, recetas: &[Receta]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO recetas (numero, fechacreacion, sucursal) VALUES (?1, ?2, ?3)",
    )?;

    for receta in recetas {
        stmt.execute(params![
            receta.numero,
            receta.fechacreacion.to_string(),
            receta.sucursal,
        ])?;
    }

    Ok(recetas.len())
}

/// Raw `numero` values matching a filter, in insertion order.
/// Feed these to the normalizer pipeline for exports.
pub fn fetch_raw_numbers(conn: &Connection, filter: &RecetaFilter) -> Result<Vec<String>> {
    let pred = filter.predicate();
    let sql = format!("SELECT numero FROM recetas{}", pred.where_sql());

    let mut stmt = conn.prepare(&sql)?;
    let numbers = stmt
        .query_map(pred.params().as_slice(), |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(numbers)
}

/// Count of raw matching rows. Pre-normalization, pre-dedup: this is the
/// record-count metric, distinct from the export list size.
pub fn count_recetas(conn: &Connection, filter: &RecetaFilter) -> Result<i64> {
    let pred = filter.predicate();
    let sql = format!("SELECT COUNT(*) FROM recetas{}", pred.where_sql());

    let count = conn.query_row(&sql, pred.params().as_slice(), |row| row.get(0))?;
    Ok(count)
}

fn parse_date(text: &str) -> std::result::Result<NaiveDate, rusqlite::Error> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| rusqlite::Error::InvalidQuery)
}

/// Lote groups matching a filter, most recent date first.
/// Ordering stays date-descending whether or not filters are supplied.
pub fn list_lotes(conn: &Connection, filter: &RecetaFilter) -> Result<Vec<LoteSummary>> {
    let pred = filter.predicate();
    let sql = format!(
        "SELECT sucursal, fechacreacion, COUNT(*) as cantidad
         FROM recetas{}
         GROUP BY sucursal, fechacreacion
         ORDER BY fechacreacion DESC",
        pred.where_sql()
    );

    let mut stmt = conn.prepare(&sql)?;
    let lotes = stmt
        .query_map(pred.params().as_slice(), |row| {
            let fecha: String = row.get(1)?;
            Ok(LoteSummary {
                sucursal: row.get(0)?,
                fechacreacion: parse_date(&fecha)?,
                cantidad: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(lotes)
}

/// Every branch value present in the store, parsed as integers and sorted
/// ascending. Values that do not parse are skipped.
pub fn distinct_sucursales(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT DISTINCT sucursal FROM recetas")?;
    let raw = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    let mut branches: Vec<i64> = raw.iter().filter_map(|s| s.trim().parse().ok()).collect();
    branches.sort_unstable();

    Ok(branches)
}

/// Move a whole lote to another branch. Bulk update keyed on the exact
/// `(branch, date)` pair; returns the number of rewritten rows.
pub fn reassign_lote(
    conn: &Connection,
    old_branch: i64,
    date: NaiveDate,
    new_branch: i64,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE recetas SET sucursal = ?1 WHERE sucursal = ?2 AND fechacreacion = ?3",
        params![
            new_branch.to_string(),
            old_branch.to_string(),
            date.to_string()
        ],
    )?;

    Ok(updated)
}

/// Remove a whole lote. Keyed on the exact `(branch, date)` pair.
pub fn delete_lote(conn: &Connection, branch: i64, date: NaiveDate) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM recetas WHERE sucursal = ?1 AND fechacreacion = ?2",
        params![branch.to_string(), date.to_string()],
    )?;

    Ok(deleted)
}

/// Per-day totals with category splits, ascending by date (chart series).
/// Category splits count raw-prefix matches, same as the count endpoints.
pub fn daily_breakdown(conn: &Connection, filter: &RecetaFilter) -> Result<Vec<DailyCount>> {
    let pred = filter.predicate();
    let sql = format!(
        "SELECT fechacreacion,
                COUNT(*) as total,
                COUNT(CASE WHEN numero LIKE '9%' THEN 1 END) as apross,
                COUNT(CASE WHEN numero LIKE '8%' THEN 1 END) as pami
         FROM recetas{}
         GROUP BY fechacreacion
         ORDER BY fechacreacion ASC",
        pred.where_sql()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(pred.params().as_slice(), |row| {
            let fecha: String = row.get(0)?;
            Ok(DailyCount {
                date: parse_date(&fecha)?,
                total: row.get(1)?,
                apross: row.get(2)?,
                pami: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Overall totals with category splits for a filtered range.
pub fn category_totals(conn: &Connection, filter: &RecetaFilter) -> Result<CategoryTotals> {
    let pred = filter.predicate();
    let sql = format!(
        "SELECT COUNT(*) as total,
                COUNT(CASE WHEN numero LIKE '9%' THEN 1 END) as apross,
                COUNT(CASE WHEN numero LIKE '8%' THEN 1 END) as pami
         FROM recetas{}",
        pred.where_sql()
    );

    let totals = conn.query_row(&sql, pred.params().as_slice(), |row| {
        Ok(CategoryTotals {
            total: row.get(0)?,
            apross: row.get(1)?,
            pami: row.get(2)?,
        })
    })?;

    Ok(totals)
}

/// A few example rows, for the diagnostic endpoint.
pub fn sample_recetas(conn: &Connection, limit: i64) -> Result<Vec<Receta>> {
    let mut stmt =
        conn.prepare("SELECT numero, fechacreacion, sucursal FROM recetas LIMIT ?1")?;

    let recetas = stmt
        .query_map(params![limit], |row| {
            let fecha: String = row.get(1)?;
            Ok(Receta {
                numero: row.get(0)?,
                fechacreacion: parse_date(&fecha)?,
                sucursal: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(recetas)
}

/// Oldest and newest record dates, or `None` when the table is empty.
pub fn date_bounds(conn: &Connection) -> Result<Option<(NaiveDate, NaiveDate)>> {
    let bounds: (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(fechacreacion), MAX(fechacreacion) FROM recetas",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    match bounds {
        (Some(min), Some(max)) => {
            let min = NaiveDate::parse_from_str(&min, "%Y-%m-%d")?;
            let max = NaiveDate::parse_from_str(&max, "%Y-%m-%d")?;
            Ok(Some((min, max)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{normalize_batch, Category};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn receta(numero: &str, fecha: &str, sucursal: &str) -> Receta {
        Receta {
            numero: numero.to_string(),
            fechacreacion: date(fecha),
            sucursal: sucursal.to_string(),
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_count_vs_export_size_differ() {
        let conn = test_conn();
        insert_recetas(
            &conn,
            &[
                receta("9A1", "2024-01-10", "1"),
                receta("9A1", "2024-01-10", "1"),
                receta("8B2", "2024-01-10", "1"),
            ],
        )
        .unwrap();

        let filter = RecetaFilter::date_range(date("2024-01-01"), date("2024-01-31"))
            .with_category(Some(Category::Apross));

        // Two raw rows match the raw-prefix selection...
        assert_eq!(count_recetas(&conn, &filter).unwrap(), 2);

        // ...but the export list deduplicates after normalization.
        let raws = fetch_raw_numbers(&conn, &filter).unwrap();
        let codes = normalize_batch(raws, Some(Category::Apross));
        assert_eq!(codes, vec!["91"]);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let conn = test_conn();
        insert_recetas(
            &conn,
            &[
                receta("901", "2024-01-01", "1"),
                receta("902", "2024-01-15", "1"),
                receta("903", "2024-01-31", "1"),
                receta("904", "2024-02-01", "1"),
            ],
        )
        .unwrap();

        let filter = RecetaFilter::date_range(date("2024-01-01"), date("2024-01-31"));
        assert_eq!(count_recetas(&conn, &filter).unwrap(), 3);
    }

    #[test]
    fn test_branch_filter_and_all_sentinel() {
        let conn = test_conn();
        insert_recetas(
            &conn,
            &[
                receta("901", "2024-01-10", "1"),
                receta("902", "2024-01-10", "2"),
                receta("903", "2024-01-10", "2"),
            ],
        )
        .unwrap();

        let range = RecetaFilter::date_range(date("2024-01-01"), date("2024-01-31"));
        assert_eq!(
            count_recetas(&conn, &range.clone().with_branch(Some(2))).unwrap(),
            2
        );
        // No branch means no branch predicate ("all").
        assert_eq!(count_recetas(&conn, &range.with_branch(None)).unwrap(), 3);
    }

    #[test]
    fn test_distinct_sucursales_parsed_and_sorted() {
        let conn = test_conn();
        insert_recetas(
            &conn,
            &[
                receta("901", "2024-01-10", "3"),
                receta("902", "2024-01-10", "1"),
                receta("903", "2024-01-11", "2"),
                receta("904", "2024-01-12", "1"),
            ],
        )
        .unwrap();

        assert_eq!(distinct_sucursales(&conn).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_list_lotes_orders_date_descending() {
        let conn = test_conn();
        insert_recetas(
            &conn,
            &[
                receta("901", "2024-01-01", "1"),
                receta("902", "2024-01-02", "1"),
                receta("903", "2024-01-02", "1"),
            ],
        )
        .unwrap();

        let lotes = list_lotes(&conn, &RecetaFilter::default()).unwrap();
        assert_eq!(lotes.len(), 2);
        assert_eq!(lotes[0].fechacreacion, date("2024-01-02"));
        assert_eq!(lotes[0].cantidad, 2);
        assert_eq!(lotes[1].fechacreacion, date("2024-01-01"));
        assert_eq!(lotes[1].cantidad, 1);
    }

    #[test]
    fn test_list_lotes_ordering_survives_filters() {
        let conn = test_conn();
        insert_recetas(
            &conn,
            &[
                receta("901", "2024-01-01", "1"),
                receta("902", "2024-01-02", "1"),
                receta("903", "2024-01-03", "2"),
            ],
        )
        .unwrap();

        let filter = RecetaFilter::default().with_branch(Some(1));
        let lotes = list_lotes(&conn, &filter).unwrap();
        assert_eq!(lotes.len(), 2);
        assert_eq!(lotes[0].fechacreacion, date("2024-01-02"));
    }

    #[test]
    fn test_reassign_lote_exact_pair_only() {
        let conn = test_conn();
        insert_recetas(
            &conn,
            &[
                receta("901", "2024-01-10", "1"),
                receta("902", "2024-01-10", "1"),
                receta("903", "2024-01-11", "1"), // other date, untouched
                receta("904", "2024-01-10", "2"), // other branch, untouched
            ],
        )
        .unwrap();

        let moved = reassign_lote(&conn, 1, date("2024-01-10"), 5).unwrap();
        assert_eq!(moved, 2);

        let range = RecetaFilter::default();
        assert_eq!(
            count_recetas(&conn, &range.clone().with_branch(Some(5))).unwrap(),
            2
        );
        assert_eq!(count_recetas(&conn, &range.with_branch(Some(1))).unwrap(), 1);
    }

    #[test]
    fn test_delete_lote_exact_pair_only() {
        let conn = test_conn();
        insert_recetas(
            &conn,
            &[
                receta("901", "2024-01-10", "1"),
                receta("902", "2024-01-10", "1"),
                receta("903", "2024-01-11", "1"),
            ],
        )
        .unwrap();

        let deleted = delete_lote(&conn, 1, date("2024-01-10")).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(count_recetas(&conn, &RecetaFilter::default()).unwrap(), 1);
    }

    #[test]
    fn test_daily_breakdown_and_totals() {
        let conn = test_conn();
        insert_recetas(
            &conn,
            &[
                receta("901", "2024-01-01", "1"),
                receta("811", "2024-01-01", "1"),
                receta("902", "2024-01-02", "1"),
                receta("X17", "2024-01-02", "1"), // neither category
            ],
        )
        .unwrap();

        let filter = RecetaFilter::date_range(date("2024-01-01"), date("2024-01-02"));
        let days = daily_breakdown(&conn, &filter).unwrap();
        assert_eq!(days.len(), 2);
        // Chart series is ascending, oldest first.
        assert_eq!(days[0].date, date("2024-01-01"));
        assert_eq!(days[0].total, 2);
        assert_eq!(days[0].apross, 1);
        assert_eq!(days[0].pami, 1);
        assert_eq!(days[1].total, 2);
        assert_eq!(days[1].apross, 1);
        assert_eq!(days[1].pami, 0);

        let totals = category_totals(&conn, &filter).unwrap();
        assert_eq!(totals.total, 4);
        assert_eq!(totals.apross, 2);
        assert_eq!(totals.pami, 1);
    }

    #[test]
    fn test_date_bounds() {
        let conn = test_conn();
        assert!(date_bounds(&conn).unwrap().is_none());

        insert_recetas(
            &conn,
            &[
                receta("901", "2024-01-05", "1"),
                receta("902", "2024-03-01", "1"),
            ],
        )
        .unwrap();

        let (min, max) = date_bounds(&conn).unwrap().unwrap();
        assert_eq!(min, date("2024-01-05"));
        assert_eq!(max, date("2024-03-01"));
    }
}
