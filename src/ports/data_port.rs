//! Data access port trait.

use crate::domain::error::VintageError;
use crate::domain::prices::PriceBar;
use crate::domain::universe::MembershipInterval;
use chrono::NaiveDate;
use std::collections::BTreeMap;

pub trait DataPort {
    /// Adjusted closes for `symbol` within `[start_date, end_date]`, sorted by date.
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, VintageError>;

    fn list_symbols(&self) -> Result<Vec<String>, VintageError>;

    /// Every recorded membership interval of `index_id`, including re-joins.
    fn fetch_memberships(&self, index_id: &str) -> Result<Vec<MembershipInterval>, VintageError>;

    /// Symbol to delisting date.
    fn fetch_delistings(&self) -> Result<BTreeMap<String, NaiveDate>, VintageError>;

    /// First date, last date and row count for `symbol`, if it has any prices.
    fn get_data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, VintageError>;
}
