//! Price bars, the date-indexed price matrix and point-in-time windows.

use crate::domain::calendar::months_before;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One adjusted close observation as delivered by a data port.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: f64,
    pub dividend: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
    pub dividend: f64,
}

/// Adjusted closes for every symbol on one date.
pub type PriceRow = BTreeMap<String, f64>;

/// Read-only table of adjusted closes, indexed both by symbol (sorted series)
/// and by date (rows). Never mutated once built.
#[derive(Debug, Clone, Default)]
pub struct PriceMatrix {
    series: BTreeMap<String, Vec<PricePoint>>,
    rows: BTreeMap<NaiveDate, PriceRow>,
}

impl PriceMatrix {
    /// Builds the matrix from unordered bars. A later bar for the same
    /// (symbol, date) replaces an earlier one.
    pub fn from_bars(bars: impl IntoIterator<Item = PriceBar>) -> Self {
        let mut by_symbol: BTreeMap<String, BTreeMap<NaiveDate, PricePoint>> = BTreeMap::new();
        for bar in bars {
            by_symbol.entry(bar.symbol).or_default().insert(
                bar.date,
                PricePoint {
                    date: bar.date,
                    close: bar.close,
                    dividend: bar.dividend,
                },
            );
        }

        let mut rows: BTreeMap<NaiveDate, PriceRow> = BTreeMap::new();
        let series = by_symbol
            .into_iter()
            .map(|(symbol, points)| {
                for point in points.values() {
                    rows.entry(point.date)
                        .or_default()
                        .insert(symbol.clone(), point.close);
                }
                (symbol, points.into_values().collect())
            })
            .collect();

        Self { series, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn symbol_count(&self) -> usize {
        self.series.len()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Every observed date across all symbols, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.keys().copied().collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next_back().copied()
    }

    pub fn row(&self, date: NaiveDate) -> Option<&PriceRow> {
        self.rows.get(&date)
    }

    pub fn series(&self, symbol: &str) -> Option<&[PricePoint]> {
        self.series.get(symbol).map(Vec::as_slice)
    }

    pub fn price(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.rows.get(&date).and_then(|row| row.get(symbol)).copied()
    }

    /// Most recent observation dated on or before `date`.
    pub fn price_on_or_before(&self, symbol: &str, date: NaiveDate) -> Option<PricePoint> {
        let points = self.series.get(symbol)?;
        let idx = points.partition_point(|p| p.date <= date);
        if idx == 0 { None } else { Some(points[idx - 1]) }
    }

    pub fn first_priced(&self, symbol: &str) -> Option<NaiveDate> {
        self.series.get(symbol)?.first().map(|p| p.date)
    }

    /// True when `symbol` has at least `min_months` calendar months of priced
    /// history strictly before `as_of`: its first observation is on or before
    /// `as_of - min_months` and it has an observation dated before `as_of`.
    pub fn has_history(&self, symbol: &str, as_of: NaiveDate, min_months: u32) -> bool {
        let Some(first) = self.first_priced(symbol) else {
            return false;
        };
        if first >= as_of {
            return false;
        }
        match months_before(as_of, min_months) {
            Some(threshold) => first <= threshold,
            None => false,
        }
    }

    /// View of the matrix that hides every observation after `as_of`.
    pub fn window(&self, as_of: NaiveDate) -> PriceWindow<'_> {
        PriceWindow { matrix: self, as_of }
    }
}

/// Point-in-time view handed to signal functions. Lookups can never see a
/// price dated after `as_of`.
#[derive(Debug, Clone, Copy)]
pub struct PriceWindow<'a> {
    matrix: &'a PriceMatrix,
    as_of: NaiveDate,
}

impl<'a> PriceWindow<'a> {
    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// Last observation on or before `min(date, as_of)`.
    pub fn price_on_or_before(&self, symbol: &str, date: NaiveDate) -> Option<PricePoint> {
        self.matrix
            .price_on_or_before(symbol, date.min(self.as_of))
    }

    pub fn latest(&self, symbol: &str) -> Option<PricePoint> {
        self.matrix.price_on_or_before(symbol, self.as_of)
    }

    /// Observations for `symbol` dated on or before `as_of`.
    pub fn history(&self, symbol: &str) -> &'a [PricePoint] {
        match self.matrix.series(symbol) {
            Some(points) => {
                let idx = points.partition_point(|p| p.date <= self.as_of);
                &points[..idx]
            }
            None => &[],
        }
    }
}
