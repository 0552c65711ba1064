//! Overlapping holding-period state.
//!
//! [`OverlapStateManager`] is the only component of a run that carries state
//! from one rebalance date to the next. It owns the collection of active
//! vintages, prunes the ones whose holding period has elapsed and exposes
//! nothing but the freshly computed composite weights.
//!
//! A vintage formed at period `f` contributes to periods `f ..= f + K - 1`.
//! The composite is the per-symbol mean over the vintages active *now*, so
//! during the first `K - 1` periods it is divided by the number of vintages
//! formed so far rather than by `K`.

use crate::domain::vintage::{Vintage, Weights, leg_exposures};
use chrono::NaiveDate;
use std::collections::VecDeque;

/// Optional post-averaging rescale of the composite legs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Renormalization {
    pub long_exposure: f64,
    pub short_exposure: f64,
}

#[derive(Debug)]
pub struct OverlapStateManager {
    holding_periods: usize,
    renormalization: Option<Renormalization>,
    active: VecDeque<Vintage>,
    period: usize,
}

impl OverlapStateManager {
    /// `holding_periods` is clamped to at least 1; K = 1 is plain
    /// non-overlapping rebalancing.
    pub fn new(holding_periods: usize) -> Self {
        Self {
            holding_periods: holding_periods.max(1),
            renormalization: None,
            active: VecDeque::new(),
            period: 0,
        }
    }

    pub fn with_renormalization(mut self, renormalization: Renormalization) -> Self {
        self.renormalization = Some(renormalization);
        self
    }

    pub fn holding_periods(&self) -> usize {
        self.holding_periods
    }

    /// Index the next call to [`advance`](Self::advance) will be assigned.
    pub fn period(&self) -> usize {
        self.period
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn formation_dates(&self) -> Vec<NaiveDate> {
        self.active.iter().map(|v| v.formation_date).collect()
    }

    /// Advances one rebalance period.
    ///
    /// `new_weights` becomes a vintage formed at `date` unless it is empty,
    /// in which case the period only ages the existing vintages.
    pub fn advance(&mut self, date: NaiveDate, new_weights: Weights) -> Weights {
        let current = self.period;
        self.period += 1;

        if !new_weights.is_empty() {
            self.active.push_back(Vintage {
                formation_date: date,
                formation_period: current,
                holding_periods: self.holding_periods,
                weights: new_weights,
            });
        }

        // Vintages are ordered by formation period, so expired ones sit at the front.
        while self
            .active
            .front()
            .is_some_and(|v| !v.is_active_at(current))
        {
            if let Some(expired) = self.active.pop_front() {
                tracing::debug!(
                    formed = %expired.formation_date,
                    %date,
                    "vintage expired"
                );
            }
        }

        let composite = self.composite();
        match self.renormalization {
            Some(target) => renormalize(composite, target),
            None => composite,
        }
    }

    /// Advances with an already validated vintage. The vintage's own
    /// formation metadata is replaced by this manager's period counter.
    pub fn advance_vintage(&mut self, vintage: Vintage) -> Weights {
        self.advance(vintage.formation_date, vintage.weights)
    }

    fn composite(&self) -> Weights {
        let mut composite = Weights::new();
        if self.active.is_empty() {
            return composite;
        }
        for vintage in &self.active {
            for (symbol, weight) in &vintage.weights {
                *composite.entry(symbol.clone()).or_insert(0.0) += weight;
            }
        }
        let n = self.active.len() as f64;
        for weight in composite.values_mut() {
            *weight /= n;
        }
        composite
    }
}

fn renormalize(mut weights: Weights, target: Renormalization) -> Weights {
    let (long, short) = leg_exposures(&weights);
    let long_scale = if long > 0.0 { target.long_exposure / long } else { 0.0 };
    let short_scale = if short > 0.0 { target.short_exposure / short } else { 0.0 };
    for weight in weights.values_mut() {
        if *weight > 0.0 {
            *weight *= long_scale;
        } else if *weight < 0.0 {
            *weight *= short_scale;
        }
    }
    weights
}
