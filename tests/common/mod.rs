#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use vintage::domain::backtest::BacktestConfig;
use vintage::domain::error::VintageError;
pub use vintage::domain::prices::PriceBar;
pub use vintage::domain::universe::MembershipInterval;
use vintage::ports::data_port::DataPort;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<PriceBar>>,
    pub memberships: HashMap<String, Vec<MembershipInterval>>,
    pub delistings: BTreeMap<String, NaiveDate>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            memberships: HashMap::new(),
            delistings: BTreeMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_membership(mut self, index_id: &str, interval: MembershipInterval) -> Self {
        self.memberships
            .entry(index_id.to_string())
            .or_default()
            .push(interval);
        self
    }

    pub fn with_delisting(mut self, symbol: &str, on: NaiveDate) -> Self {
        self.delistings.insert(symbol.to_string(), on);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, VintageError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(VintageError::DataQuery {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start_date && b.date <= end_date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, VintageError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    fn fetch_memberships(&self, index_id: &str) -> Result<Vec<MembershipInterval>, VintageError> {
        self.memberships
            .get(index_id)
            .cloned()
            .ok_or_else(|| VintageError::Data {
                reason: format!("no membership history for {index_id}"),
            })
    }

    fn fetch_delistings(&self) -> Result<BTreeMap<String, NaiveDate>, VintageError> {
        Ok(self.delistings.clone())
    }

    fn get_data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, VintageError> {
        match self.data.get(symbol) {
            Some(bars) if !bars.is_empty() => {
                let min = bars.iter().map(|b| b.date).min().unwrap();
                let max = bars.iter().map(|b| b.date).max().unwrap();
                Ok(Some((min, max, bars.len())))
            }
            _ => Ok(None),
        }
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn member(symbol: &str, start: NaiveDate, end: Option<NaiveDate>) -> MembershipInterval {
    MembershipInterval {
        symbol: symbol.to_string(),
        start,
        end,
    }
}

/// Weekday closes from `start` to `end` compounding at `daily_growth`.
pub fn business_day_bars(
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    start_price: f64,
    daily_growth: f64,
) -> Vec<PriceBar> {
    let mut bars = Vec::new();
    let mut price = start_price;
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            bars.push(PriceBar {
                symbol: symbol.to_string(),
                date: day,
                close: price,
                dividend: 0.0,
            });
            price *= 1.0 + daily_growth;
        }
        day = day.succ_opt().unwrap();
    }
    bars
}

/// Symbols `S0`..`S{n-1}` with growth increasing by index, so the ranking is
/// stable and `S{n-1}` is always the strongest.
pub fn ranked_symbols(n: usize) -> Vec<(String, f64)> {
    (0..n)
        .map(|i| (format!("S{i}"), -0.001 + 0.0004 * i as f64))
        .collect()
}

pub fn sample_port(n: usize) -> MockDataPort {
    let mut port = MockDataPort::new();
    for (symbol, growth) in ranked_symbols(n) {
        port = port
            .with_bars(
                &symbol,
                business_day_bars(&symbol, date(2000, 1, 3), date(2002, 12, 31), 100.0, growth),
            )
            .with_membership("IDX", member(&symbol, date(2000, 1, 1), None));
    }
    port
}

pub fn sample_config() -> BacktestConfig {
    let mut config = BacktestConfig::new("IDX", date(2001, 1, 1), date(2002, 12, 31));
    config.lookback_months = 3;
    config.skip_months = 1;
    config.holding_months = 3;
    config.selection_fraction = 0.2;
    config.min_history_months = 3;
    config
}

/// Writes the port's contents in the CSV directory layout.
pub fn write_csv_dir(port: &MockDataPort, base: &Path) {
    fs::create_dir_all(base.join("prices")).unwrap();
    fs::create_dir_all(base.join("memberships")).unwrap();

    for (symbol, bars) in &port.data {
        let mut content = String::from("date,close,dividend\n");
        for bar in bars {
            content.push_str(&format!("{},{},{}\n", bar.date, bar.close, bar.dividend));
        }
        fs::write(base.join("prices").join(format!("{symbol}.csv")), content).unwrap();
    }

    for (index_id, intervals) in &port.memberships {
        let mut content = String::from("symbol,start_date,end_date\n");
        for i in intervals {
            let end = i.end.map(|e| e.to_string()).unwrap_or_default();
            content.push_str(&format!("{},{},{}\n", i.symbol, i.start, end));
        }
        fs::write(base.join("memberships").join(format!("{index_id}.csv")), content).unwrap();
    }

    if !port.delistings.is_empty() {
        let mut content = String::from("symbol,delisted_on\n");
        for (symbol, on) in &port.delistings {
            content.push_str(&format!("{symbol},{on}\n"));
        }
        fs::write(base.join("delistings.csv"), content).unwrap();
    }
}
