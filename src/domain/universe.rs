//! Point-in-time universe resolution.
//!
//! Resolves which symbols were legitimately investable in an index on a given
//! date from historical membership intervals, delisting records and the
//! available price history. Snapshots are memoised per
//! (index, date, history requirement); the cache only saves work and never
//! changes an answer.

use crate::domain::error::VintageError;
use crate::domain::prices::PriceMatrix;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// One continuous stay of a symbol in an index. `end` is the first date the
/// symbol is no longer a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipInterval {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl MembershipInterval {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && self.end.is_none_or(|end| date < end)
    }
}

/// Full membership record of one index, known up to `covered_through`.
#[derive(Debug, Clone)]
pub struct ConstituentHistory {
    pub index_id: String,
    intervals: Vec<MembershipInterval>,
    delistings: BTreeMap<String, NaiveDate>,
    covered_through: NaiveDate,
}

impl ConstituentHistory {
    pub fn new(
        index_id: impl Into<String>,
        mut intervals: Vec<MembershipInterval>,
        delistings: BTreeMap<String, NaiveDate>,
        covered_through: NaiveDate,
    ) -> Self {
        intervals.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.start.cmp(&b.start)));
        Self {
            index_id: index_id.into(),
            intervals,
            delistings,
            covered_through,
        }
    }

    pub fn intervals(&self) -> &[MembershipInterval] {
        &self.intervals
    }

    pub fn delisted_on(&self, symbol: &str) -> Option<NaiveDate> {
        self.delistings.get(symbol).copied()
    }

    /// First recorded inclusion through `covered_through`, or `None` when the
    /// history holds no intervals at all.
    pub fn coverage(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.intervals.iter().map(|i| i.start).min()?;
        Some((first, self.covered_through))
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.coverage()
            .is_some_and(|(first, last)| first <= date && date <= last)
    }

    /// Intervals covering `date`, at most one per symbol.
    fn intervals_at(&self, date: NaiveDate) -> impl Iterator<Item = &MembershipInterval> {
        let mut last_symbol: Option<&str> = None;
        self.intervals.iter().filter(move |i| {
            if !i.covers(date) || last_symbol == Some(i.symbol.as_str()) {
                return false;
            }
            last_symbol = Some(i.symbol.as_str());
            true
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniverseMember {
    pub symbol: String,
    pub included_since: NaiveDate,
    /// Scheduled end of the current membership interval as recorded in the
    /// dataset. Always after `as_of`; strategy code must not trade on it.
    pub excluded_on: Option<NaiveDate>,
}

/// Immutable, symbol-sorted set of eligible members on `as_of`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    pub index_id: String,
    pub as_of: NaiveDate,
    pub members: Vec<UniverseMember>,
}

impl Universe {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.members
            .binary_search_by(|m| m.symbol.as_str().cmp(symbol))
            .is_ok()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.symbol.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SnapshotKey {
    index_id: String,
    as_of: NaiveDate,
    min_history_months: u32,
}

pub struct UniverseResolver<'a> {
    prices: &'a PriceMatrix,
    histories: HashMap<String, ConstituentHistory>,
    cache: Mutex<HashMap<SnapshotKey, Universe>>,
}

impl<'a> UniverseResolver<'a> {
    pub fn new(prices: &'a PriceMatrix) -> Self {
        Self {
            prices,
            histories: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_history(mut self, history: ConstituentHistory) -> Self {
        self.add_history(history);
        self
    }

    /// Registers (or replaces) an index history. Cached snapshots of that
    /// index are dropped.
    pub fn add_history(&mut self, history: ConstituentHistory) {
        let index_id = history.index_id.clone();
        self.cache
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|key, _| key.index_id != index_id);
        self.histories.insert(index_id, history);
    }

    pub fn history(&self, index_id: &str) -> Option<&ConstituentHistory> {
        self.histories.get(index_id)
    }

    pub fn cached_snapshots(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Eligible members of `index_id` on `as_of`.
    ///
    /// Fails with [`VintageError::InsufficientData`] when the index is unknown
    /// or its membership history does not cover `as_of`. An empty universe is
    /// a valid answer; the caller decides whether that is an error.
    pub fn resolve(
        &self,
        index_id: &str,
        as_of: NaiveDate,
        min_history_months: u32,
    ) -> Result<Universe, VintageError> {
        let key = SnapshotKey {
            index_id: index_id.to_string(),
            as_of,
            min_history_months,
        };
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(hit.clone());
        }

        let universe = self.compute(index_id, as_of, min_history_months)?;
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, universe.clone());
        Ok(universe)
    }

    /// Resolves every date concurrently and stores the successful snapshots
    /// in the cache. Results are keyed by date for sequential lookup.
    pub fn prefetch(
        &self,
        index_id: &str,
        dates: &[NaiveDate],
        min_history_months: u32,
    ) -> BTreeMap<NaiveDate, Result<Universe, VintageError>> {
        let resolved: Vec<(NaiveDate, Result<Universe, VintageError>)> = dates
            .par_iter()
            .map(|&date| (date, self.compute(index_id, date, min_history_months)))
            .collect();

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        for (date, result) in &resolved {
            if let Ok(universe) = result {
                cache.insert(
                    SnapshotKey {
                        index_id: index_id.to_string(),
                        as_of: *date,
                        min_history_months,
                    },
                    universe.clone(),
                );
            }
        }
        drop(cache);

        tracing::info!(
            index_id,
            dates = dates.len(),
            failed = resolved.iter().filter(|(_, r)| r.is_err()).count(),
            "universe snapshots prefetched"
        );
        resolved.into_iter().collect()
    }

    fn compute(
        &self,
        index_id: &str,
        as_of: NaiveDate,
        min_history_months: u32,
    ) -> Result<Universe, VintageError> {
        let history = self
            .histories
            .get(index_id)
            .ok_or_else(|| VintageError::InsufficientData {
                subject: index_id.to_string(),
                date: as_of,
                reason: "no constituent history for index".to_string(),
            })?;

        if !history.covers(as_of) {
            let reason = match history.coverage() {
                Some((first, last)) => {
                    format!("constituent history covers {first} to {last}")
                }
                None => "constituent history is empty".to_string(),
            };
            return Err(VintageError::InsufficientData {
                subject: index_id.to_string(),
                date: as_of,
                reason,
            });
        }

        let members = history
            .intervals_at(as_of)
            .filter(|i| history.delisted_on(&i.symbol).is_none_or(|d| d > as_of))
            .filter(|i| self.prices.has_history(&i.symbol, as_of, min_history_months))
            .map(|i| UniverseMember {
                symbol: i.symbol.clone(),
                included_since: i.start,
                excluded_on: i.end,
            })
            .collect();

        Ok(Universe {
            index_id: index_id.to_string(),
            as_of,
            members,
        })
    }
}
