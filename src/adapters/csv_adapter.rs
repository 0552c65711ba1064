//! CSV directory data adapter.
//!
//! Layout under the base directory:
//!
//! ```text
//! prices/<SYMBOL>.csv        date,close[,dividend]
//! memberships/<INDEX>.csv    symbol,start_date,end_date
//! delistings.csv             symbol,delisted_on
//! ```
//!
//! An empty `end_date` means the membership is still open. `delistings.csv`
//! is optional.

use crate::domain::error::VintageError;
use crate::domain::prices::PriceBar;
use crate::domain::universe::MembershipInterval;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct PriceRecord {
    date: NaiveDate,
    close: f64,
    #[serde(default)]
    dividend: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MembershipRecord {
    symbol: String,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct DelistingRecord {
    symbol: String,
    delisted_on: NaiveDate,
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn price_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join("prices").join(format!("{symbol}.csv"))
    }

    fn membership_path(&self, index_id: &str) -> PathBuf {
        self.base_path.join("memberships").join(format!("{index_id}.csv"))
    }

    fn delistings_path(&self) -> PathBuf {
        self.base_path.join("delistings.csv")
    }
}

fn read_records<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, VintageError> {
    let content = fs::read_to_string(path).map_err(|e| VintageError::Data {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    rdr.deserialize()
        .map(|row| {
            row.map_err(|e| VintageError::Data {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })
        })
        .collect()
}

impl DataPort for CsvAdapter {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, VintageError> {
        let records: Vec<PriceRecord> = read_records(&self.price_path(symbol))?;
        let mut bars: Vec<PriceBar> = records
            .into_iter()
            .filter(|r| r.date >= start_date && r.date <= end_date)
            .map(|r| PriceBar {
                symbol: symbol.to_string(),
                date: r.date,
                close: r.close,
                dividend: r.dividend.unwrap_or(0.0),
            })
            .collect();
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, VintageError> {
        let dir = self.base_path.join("prices");
        let entries = fs::read_dir(&dir).map_err(|e| VintageError::Data {
            reason: format!("failed to read directory {}: {}", dir.display(), e),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| VintageError::Data {
                reason: format!("directory entry error: {e}"),
            })?;
            let name = entry.file_name();
            if let Some(symbol) = name.to_string_lossy().strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }

    fn fetch_memberships(&self, index_id: &str) -> Result<Vec<MembershipInterval>, VintageError> {
        let records: Vec<MembershipRecord> = read_records(&self.membership_path(index_id))?;
        records
            .into_iter()
            .map(|r| {
                if r.end_date.is_some_and(|end| end <= r.start_date) {
                    return Err(VintageError::Data {
                        reason: format!(
                            "membership of {} in {} ends before it starts",
                            r.symbol, index_id
                        ),
                    });
                }
                Ok(MembershipInterval {
                    symbol: r.symbol,
                    start: r.start_date,
                    end: r.end_date,
                })
            })
            .collect()
    }

    fn fetch_delistings(&self) -> Result<BTreeMap<String, NaiveDate>, VintageError> {
        let path = self.delistings_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let records: Vec<DelistingRecord> = read_records(&path)?;
        Ok(records
            .into_iter()
            .map(|r| (r.symbol, r.delisted_on))
            .collect())
    }

    fn get_data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, VintageError> {
        let path = self.price_path(symbol);
        if !path.exists() {
            return Ok(None);
        }
        let records: Vec<PriceRecord> = read_records(&path)?;
        let first = records.iter().map(|r| r.date).min();
        let last = records.iter().map(|r| r.date).max();
        Ok(first.zip(last).map(|(f, l)| (f, l, records.len())))
    }
}
