//! Rebalance calendar: month-end schedules and calendar-month arithmetic.

use crate::domain::error::VintageError;
use chrono::{Datelike, Months, NaiveDate};

/// Calendar date `months` months before `date`, clamped to the end of the
/// target month (e.g. 2020-03-31 minus one month is 2020-02-29).
pub fn months_before(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_sub_months(Months::new(months))
}

/// Last trading date of each calendar month that falls within `[start, end]`.
///
/// `trading_dates` need not be sorted or unique. The final month is included
/// even if it is only partially observed, since the caller decides where the
/// run ends.
pub fn month_end_dates(trading_dates: &[NaiveDate], start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = trading_dates
        .iter()
        .copied()
        .filter(|d| *d >= start && *d <= end)
        .collect();
    dates.sort();
    dates.dedup();

    let mut month_ends: Vec<NaiveDate> = Vec::new();
    for date in dates {
        match month_ends.last_mut() {
            Some(last) if last.year() == date.year() && last.month() == date.month() => {
                *last = date;
            }
            _ => month_ends.push(date),
        }
    }
    month_ends
}

/// Rebalance dates must be non-empty and strictly increasing.
pub fn validate_rebalance_dates(dates: &[NaiveDate]) -> Result<(), VintageError> {
    if dates.is_empty() {
        return Err(VintageError::config_invalid(
            "backtest",
            "rebalance_dates",
            "rebalance date sequence is empty",
        ));
    }
    if let Some(pair) = dates.windows(2).find(|w| w[1] <= w[0]) {
        return Err(VintageError::config_invalid(
            "backtest",
            "rebalance_dates",
            format!(
                "rebalance dates must be strictly increasing ({} then {})",
                pair[0], pair[1]
            ),
        ));
    }
    Ok(())
}
