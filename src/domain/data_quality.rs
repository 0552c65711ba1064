//! Price data quality checks run before a backtest.

use crate::domain::prices::PriceMatrix;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeMap;
use std::fmt;

/// Consecutive observations this many business days apart are a gap.
pub const GAP_BUSINESS_DAYS: i64 = 10;
/// Day-over-day move treated as a missed split or dividend adjustment.
pub const ADJUSTMENT_JUMP: f64 = 0.40;
/// A series ending this many calendar days before the matrix is presumed delisted.
pub const DELISTING_DAYS: i64 = 30;

const SUMMARY_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub total_symbols: usize,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub missing_values: BTreeMap<String, usize>,
    pub date_gaps: BTreeMap<String, Vec<(NaiveDate, NaiveDate)>>,
    pub adjustment_issues: Vec<String>,
    pub delistings: BTreeMap<String, NaiveDate>,
    pub is_valid: bool,
    pub summary: String,
}

pub fn validate_prices(prices: &PriceMatrix, check_delistings: bool) -> ValidationReport {
    let mut missing_values = BTreeMap::new();
    let mut date_gaps = BTreeMap::new();
    let mut adjustment_issues = Vec::new();
    let mut delistings = BTreeMap::new();
    let last_date = prices.last_date();

    for symbol in prices.symbols() {
        let Some(series) = prices.series(symbol) else {
            continue;
        };

        let missing = series.iter().filter(|p| !p.close.is_finite()).count();
        if missing > 0 {
            missing_values.insert(symbol.to_string(), missing);
        }

        let gaps: Vec<(NaiveDate, NaiveDate)> = series
            .windows(2)
            .map(|w| (w[0].date, w[1].date))
            .filter(|&(a, b)| business_days_between(a, b) >= GAP_BUSINESS_DAYS)
            .collect();
        if !gaps.is_empty() {
            tracing::warn!(symbol, gaps = gaps.len(), "date gaps in price series");
            date_gaps.insert(symbol.to_string(), gaps);
        }

        let negative = series.iter().any(|p| p.close < 0.0);
        let jump = series.windows(2).any(|w| {
            let (prev, curr) = (w[0], w[1]);
            prev.close.is_finite()
                && curr.close.is_finite()
                && prev.close != 0.0
                && (curr.close / prev.close - 1.0).abs() > ADJUSTMENT_JUMP
                && curr.dividend == 0.0
        });
        if negative || jump {
            tracing::warn!(symbol, negative, jump, "possible adjustment issue");
            adjustment_issues.push(symbol.to_string());
        }

        if check_delistings {
            if let (Some(last), Some(end)) = (series.last(), last_date) {
                if (end - last.date).num_days() > DELISTING_DAYS {
                    delistings.insert(symbol.to_string(), last.date);
                }
            }
        }
    }

    let is_valid = missing_values.is_empty() && date_gaps.is_empty() && adjustment_issues.is_empty();
    let total_symbols = prices.symbol_count();
    let summary = summarize(
        total_symbols,
        &missing_values,
        &date_gaps,
        &adjustment_issues,
        &delistings,
    );

    ValidationReport {
        total_symbols,
        date_range: prices.first_date().zip(last_date),
        missing_values,
        date_gaps,
        adjustment_issues,
        delistings,
        is_valid,
        summary,
    }
}

/// Weekdays in `(from, to]`.
pub fn business_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    from.iter_days()
        .skip(1)
        .take_while(|d| *d <= to)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as i64
}

fn summarize(
    total: usize,
    missing: &BTreeMap<String, usize>,
    gaps: &BTreeMap<String, Vec<(NaiveDate, NaiveDate)>>,
    adjustments: &[String],
    delistings: &BTreeMap<String, NaiveDate>,
) -> String {
    let mut issues = Vec::new();
    if !missing.is_empty() {
        let values: usize = missing.values().sum();
        issues.push(format!("{} symbol(s) with {values} missing value(s)", missing.len()));
    }
    if !gaps.is_empty() {
        let count: usize = gaps.values().map(Vec::len).sum();
        issues.push(format!("{} symbol(s) with {count} date gap(s)", gaps.len()));
    }
    if !adjustments.is_empty() {
        issues.push(format!("{} symbol(s) with adjustment issue(s)", adjustments.len()));
    }
    if !delistings.is_empty() {
        issues.push(format!("{} delisted", delistings.len()));
    }

    if issues.is_empty() {
        return format!("Validation complete: {total} symbols, no issues detected");
    }
    let message = format!("Validation found issues: {}", issues.join("; "));
    if message.chars().count() > SUMMARY_LIMIT {
        let head: String = message.chars().take(SUMMARY_LIMIT - 3).collect();
        format!("{head}...")
    } else {
        message
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count_line = |n: usize, suffix: &str| {
            if n == 0 { "None".to_string() } else { format!("{n} symbol(s){suffix}") }
        };

        writeln!(f, "===== Validation Report =====")?;
        writeln!(f, "Total Symbols: {}", self.total_symbols)?;
        match self.date_range {
            Some((first, last)) => writeln!(f, "Date Range: {first} to {last}")?,
            None => writeln!(f, "Date Range: empty")?,
        }
        writeln!(f, "Missing Data: {}", count_line(self.missing_values.len(), " with issues"))?;
        writeln!(f, "Date Gaps: {}", count_line(self.date_gaps.len(), " with issues"))?;
        writeln!(f, "Adjustment Issues: {}", count_line(self.adjustment_issues.len(), ""))?;
        writeln!(f, "Delisting Events: {}", count_line(self.delistings.len(), ""))?;
        writeln!(f, "Status: {}", if self.is_valid { "VALID" } else { "INVALID" })?;
        writeln!(f, "Summary: {}", self.summary)?;
        write!(f, "=============================")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prices::PriceBar;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bar(symbol: &str, date: NaiveDate, close: f64, dividend: f64) -> PriceBar {
        PriceBar {
            symbol: symbol.to_string(),
            date,
            close,
            dividend,
        }
    }

    /// Weekday closes for `days` business days from 2020-01-06.
    fn daily(symbol: &str, days: usize, close: impl Fn(usize) -> f64) -> Vec<PriceBar> {
        d(2020, 1, 6)
            .iter_days()
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .take(days)
            .enumerate()
            .map(|(i, date)| bar(symbol, date, close(i), 0.0))
            .collect()
    }

    #[test]
    fn clean_data_is_valid() {
        let prices = PriceMatrix::from_bars(daily("AAA", 30, |i| 100.0 + i as f64));
        let report = validate_prices(&prices, true);
        assert!(report.is_valid);
        assert_eq!(report.total_symbols, 1);
        assert!(report.summary.starts_with("Validation complete"));
        assert!(report.to_string().contains("Status: VALID"));
    }

    #[test]
    fn business_days_skip_weekends() {
        // Friday to the following Monday
        assert_eq!(business_days_between(d(2020, 1, 10), d(2020, 1, 13)), 1);
        assert_eq!(business_days_between(d(2020, 1, 6), d(2020, 1, 20)), 10);
    }

    #[test]
    fn two_week_hole_is_a_gap() {
        let prices = PriceMatrix::from_bars(vec![
            bar("AAA", d(2020, 1, 6), 100.0, 0.0),
            bar("AAA", d(2020, 1, 20), 101.0, 0.0),
            bar("AAA", d(2020, 1, 21), 102.0, 0.0),
        ]);
        let report = validate_prices(&prices, false);
        assert!(!report.is_valid);
        assert_eq!(report.date_gaps["AAA"], vec![(d(2020, 1, 6), d(2020, 1, 20))]);
    }

    #[test]
    fn nan_close_counts_as_missing() {
        let prices = PriceMatrix::from_bars(daily("AAA", 5, |i| if i == 2 { f64::NAN } else { 10.0 }));
        let report = validate_prices(&prices, false);
        assert_eq!(report.missing_values["AAA"], 1);
        assert!(!report.is_valid);
    }

    #[test]
    fn unexplained_jump_flags_adjustment() {
        let prices = PriceMatrix::from_bars(daily("AAA", 5, |i| if i < 3 { 100.0 } else { 50.0 }));
        let report = validate_prices(&prices, false);
        assert_eq!(report.adjustment_issues, vec!["AAA".to_string()]);
    }

    #[test]
    fn jump_on_dividend_day_is_accepted() {
        let mut bars = daily("AAA", 5, |i| if i < 3 { 100.0 } else { 50.0 });
        bars[3].dividend = 50.0;
        let report = validate_prices(&PriceMatrix::from_bars(bars), false);
        assert!(report.adjustment_issues.is_empty());
    }

    #[test]
    fn stale_series_is_reported_as_delisted_but_valid() {
        let mut bars = daily("AAA", 60, |_| 10.0);
        bars.extend(daily("BBB", 10, |_| 20.0));
        let report = validate_prices(&PriceMatrix::from_bars(bars), true);
        assert!(report.delistings.contains_key("BBB"));
        assert!(!report.delistings.contains_key("AAA"));
        assert!(report.is_valid);
        assert!(report.summary.contains("1 delisted"));

        let unchecked = validate_prices(&PriceMatrix::from_bars(daily("BBB", 10, |_| 20.0)), false);
        assert!(unchecked.delistings.is_empty());
    }

    #[test]
    fn summary_lists_every_issue_kind() {
        let mut bars = daily("AAA", 5, |i| if i == 1 { f64::NAN } else { 10.0 });
        bars.extend(daily("BBB", 5, |i| if i < 2 { 10.0 } else { 2.0 }));
        let report = validate_prices(&PriceMatrix::from_bars(bars), false);
        assert_eq!(
            report.summary,
            "Validation found issues: 1 symbol(s) with 1 missing value(s); 1 symbol(s) with adjustment issue(s)"
        );
        assert!(report.summary.len() <= 200);
        let rendered = report.to_string();
        assert!(rendered.starts_with("===== Validation Report ====="));
        assert!(rendered.contains("Status: INVALID"));
        assert!(rendered.contains("Missing Data: 1 symbol(s) with issues"));
    }
}
