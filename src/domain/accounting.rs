//! Period returns, turnover and the multiplicative equity curve.

use crate::domain::prices::PriceRow;
use crate::domain::vintage::Weights;
use std::collections::BTreeSet;

/// Outcome of one accounting step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub period_return: f64,
    pub turnover: f64,
    /// Held symbols left out of the return because a usable price was
    /// missing on either date.
    pub excluded: Vec<String>,
}

fn usable(price: Option<&f64>) -> Option<f64> {
    price.copied().filter(|p| p.is_finite() && *p > 0.0)
}

/// `Σ prev[s] · (p_t[s] / p_{t-1}[s] − 1)` over symbols priced on both dates.
pub fn period_return(prev_weights: &Weights, prev_row: &PriceRow, row: &PriceRow) -> (f64, Vec<String>) {
    let mut total = 0.0;
    let mut excluded = Vec::new();
    for (symbol, &weight) in prev_weights {
        if weight == 0.0 {
            continue;
        }
        match (usable(prev_row.get(symbol)), usable(row.get(symbol))) {
            (Some(before), Some(after)) => total += weight * (after / before - 1.0),
            _ => excluded.push(symbol.clone()),
        }
    }
    (total, excluded)
}

/// One-way turnover: `0.5 · Σ |curr − prev|` over the union of symbols.
pub fn turnover(prev_weights: &Weights, curr_weights: &Weights) -> f64 {
    let symbols: BTreeSet<&String> = prev_weights.keys().chain(curr_weights.keys()).collect();
    let traded: f64 = symbols
        .into_iter()
        .map(|s| {
            let before = prev_weights.get(s).copied().unwrap_or(0.0);
            let after = curr_weights.get(s).copied().unwrap_or(0.0);
            (after - before).abs()
        })
        .sum();
    0.5 * traded
}

/// Tracks cumulative equity across steps, seeded at 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnAccountant {
    equity: f64,
}

impl Default for ReturnAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl ReturnAccountant {
    pub fn new() -> Self {
        Self { equity: 1.0 }
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    /// Accounts for the holding period from `t − 1` to `t`: `prev_weights`
    /// earn the price move, the change to `curr_weights` is the turnover.
    pub fn step(
        &mut self,
        prev_weights: &Weights,
        curr_weights: &Weights,
        prev_row: &PriceRow,
        row: &PriceRow,
    ) -> StepOutcome {
        let (period_return, excluded) = period_return(prev_weights, prev_row, row);
        let turnover = turnover(prev_weights, curr_weights);
        self.equity *= 1.0 + period_return;
        StepOutcome {
            period_return,
            turnover,
            excluded,
        }
    }
}
