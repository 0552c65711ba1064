//! SQLite data adapter.
//!
//! Dates are stored as `YYYY-MM-DD` text so lexical and calendar order agree.

use crate::domain::error::VintageError;
use crate::domain::prices::PriceBar;
use crate::domain::universe::MembershipInterval;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::collections::BTreeMap;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> VintageError {
    VintageError::Data {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> VintageError {
    VintageError::DataQuery {
        reason: e.to_string(),
    }
}

fn date_text(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Reads a text column as a date inside a row mapper.
fn date_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn optional_date_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        NaiveDate::parse_from_str(&t, DATE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, VintageError> {
        let db_path = config
            .get_string("sqlite", "path")
            .ok_or_else(|| VintageError::config_missing("sqlite", "path"))?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        tracing::debug!(path = %db_path, pool_size, "sqlite pool ready");
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, VintageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(pool_err)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, VintageError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), VintageError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS prices (
                    symbol TEXT NOT NULL,
                    date TEXT NOT NULL,
                    close REAL NOT NULL,
                    dividend REAL NOT NULL DEFAULT 0,
                    PRIMARY KEY (symbol, date)
                );
                CREATE TABLE IF NOT EXISTS memberships (
                    index_id TEXT NOT NULL,
                    symbol TEXT NOT NULL,
                    start_date TEXT NOT NULL,
                    end_date TEXT,
                    PRIMARY KEY (index_id, symbol, start_date)
                );
                CREATE TABLE IF NOT EXISTS delistings (
                    symbol TEXT PRIMARY KEY,
                    delisted_on TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_prices_date ON prices(date);",
            )
            .map_err(query_err)
    }

    pub fn insert_prices(&self, bars: &[PriceBar]) -> Result<(), VintageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO prices (symbol, date, close, dividend)
                 VALUES (?1, ?2, ?3, ?4)",
                params![bar.symbol, date_text(bar.date), bar.close, bar.dividend],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    pub fn insert_memberships(
        &self,
        index_id: &str,
        intervals: &[MembershipInterval],
    ) -> Result<(), VintageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for interval in intervals {
            tx.execute(
                "INSERT OR REPLACE INTO memberships (index_id, symbol, start_date, end_date)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    index_id,
                    interval.symbol,
                    date_text(interval.start),
                    interval.end.map(date_text)
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    pub fn insert_delisting(&self, symbol: &str, delisted_on: NaiveDate) -> Result<(), VintageError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO delistings (symbol, delisted_on) VALUES (?1, ?2)",
                params![symbol, date_text(delisted_on)],
            )
            .map_err(query_err)?;
        Ok(())
    }
}

impl DataPort for SqliteAdapter {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, VintageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, date, close, dividend
                 FROM prices
                 WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![symbol, date_text(start_date), date_text(end_date)],
                |row| {
                    Ok(PriceBar {
                        symbol: row.get(0)?,
                        date: date_column(row, 1)?,
                        close: row.get(2)?,
                        dividend: row.get(3)?,
                    })
                },
            )
            .map_err(query_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn list_symbols(&self) -> Result<Vec<String>, VintageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM prices ORDER BY symbol")
            .map_err(query_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(query_err)
    }

    fn fetch_memberships(&self, index_id: &str) -> Result<Vec<MembershipInterval>, VintageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, start_date, end_date
                 FROM memberships
                 WHERE index_id = ?1
                 ORDER BY symbol, start_date",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![index_id], |row| {
                Ok(MembershipInterval {
                    symbol: row.get(0)?,
                    start: date_column(row, 1)?,
                    end: optional_date_column(row, 2)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn fetch_delistings(&self) -> Result<BTreeMap<String, NaiveDate>, VintageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT symbol, delisted_on FROM delistings")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, date_column(row, 1)?)))
            .map_err(query_err)?;
        rows.collect::<Result<BTreeMap<_, _>, _>>().map_err(query_err)
    }

    fn get_data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, VintageError> {
        let conn = self.conn()?;
        let result: (Option<String>, Option<String>, i64) = conn
            .query_row(
                "SELECT MIN(date), MAX(date), COUNT(*) FROM prices WHERE symbol = ?1",
                params![symbol],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match result {
            (Some(min_str), Some(max_str), count) if count > 0 => {
                let parse = |s: &str| {
                    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| VintageError::Data {
                        reason: e.to_string(),
                    })
                };
                Ok(Some((parse(&min_str)?, parse(&max_str)?, count as usize)))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_double(&self, _section: &str, _key: &str, default: f64) -> f64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bar(symbol: &str, date: NaiveDate, close: f64) -> PriceBar {
        PriceBar {
            symbol: symbol.to_string(),
            date,
            close,
            dividend: 0.0,
        }
    }

    fn adapter() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        adapter
    }

    #[test]
    fn from_config_missing_path() {
        match SqliteAdapter::from_config(&EmptyConfig) {
            Err(VintageError::ConfigMissing { section, key }) => {
                assert_eq!(section, "sqlite");
                assert_eq!(key, "path");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let adapter = adapter();
        adapter.initialize_schema().unwrap();
    }

    #[test]
    fn fetch_prices_filters_by_range() {
        let adapter = adapter();
        adapter
            .insert_prices(&[
                bar("AAA", d(2024, 1, 2), 101.5),
                bar("AAA", d(2024, 1, 1), 100.5),
                bar("AAA", d(2024, 1, 3), 102.5),
                bar("BBB", d(2024, 1, 1), 10.0),
            ])
            .unwrap();

        let fetched = adapter.fetch_prices("AAA", d(2024, 1, 1), d(2024, 1, 2)).unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].date, d(2024, 1, 1));
        assert_eq!(fetched[1].close, 101.5);
    }

    #[test]
    fn list_symbols_is_sorted_and_distinct() {
        let adapter = adapter();
        adapter
            .insert_prices(&[
                bar("CCC", d(2024, 1, 1), 1.0),
                bar("AAA", d(2024, 1, 1), 1.0),
                bar("AAA", d(2024, 1, 2), 1.0),
            ])
            .unwrap();
        assert_eq!(adapter.list_symbols().unwrap(), vec!["AAA", "CCC"]);
    }

    #[test]
    fn memberships_round_trip_open_and_closed_intervals() {
        let adapter = adapter();
        let intervals = vec![
            MembershipInterval {
                symbol: "AAA".into(),
                start: d(2010, 1, 1),
                end: None,
            },
            MembershipInterval {
                symbol: "BBB".into(),
                start: d(2010, 1, 1),
                end: Some(d(2012, 1, 1)),
            },
        ];
        adapter.insert_memberships("IDX", &intervals).unwrap();

        assert_eq!(adapter.fetch_memberships("IDX").unwrap(), intervals);
        assert!(adapter.fetch_memberships("OTHER").unwrap().is_empty());
    }

    #[test]
    fn delistings_by_symbol() {
        let adapter = adapter();
        adapter.insert_delisting("ZZZ", d(2015, 6, 30)).unwrap();
        assert_eq!(adapter.fetch_delistings().unwrap()["ZZZ"], d(2015, 6, 30));
    }

    #[test]
    fn data_range_and_empty_range() {
        let adapter = adapter();
        adapter
            .insert_prices(&[bar("AAA", d(2024, 1, 1), 1.0), bar("AAA", d(2024, 1, 5), 2.0)])
            .unwrap();

        assert_eq!(
            adapter.get_data_range("AAA").unwrap(),
            Some((d(2024, 1, 1), d(2024, 1, 5), 2))
        );
        assert!(adapter.get_data_range("BBB").unwrap().is_none());
    }
}
