//! Cross-sectional signal functions.
//!
//! A signal maps a point-in-time price window and the eligible universe to a
//! score per symbol. Symbols without enough history score `NaN` or are left
//! out. Any `Fn(&PriceWindow, &Universe) -> Scores` is a signal.

use crate::domain::calendar::months_before;
use crate::domain::prices::PriceWindow;
use crate::domain::universe::Universe;
use std::collections::BTreeMap;

pub type Scores = BTreeMap<String, f64>;

pub trait SignalFunction {
    fn score(&self, window: &PriceWindow<'_>, universe: &Universe) -> Scores;
}

impl<F> SignalFunction for F
where
    F: Fn(&PriceWindow<'_>, &Universe) -> Scores,
{
    fn score(&self, window: &PriceWindow<'_>, universe: &Universe) -> Scores {
        self(window, universe)
    }
}

/// Trailing total return over `lookback_months`, ending `skip_months` before
/// the rebalance date (the classic 12-1 momentum with 12 and 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MomentumSignal {
    pub lookback_months: u32,
    pub skip_months: u32,
}

impl MomentumSignal {
    pub fn new(lookback_months: u32, skip_months: u32) -> Self {
        Self {
            lookback_months,
            skip_months,
        }
    }

    fn score_symbol(&self, window: &PriceWindow<'_>, symbol: &str) -> f64 {
        let as_of = window.as_of();
        let anchors = months_before(as_of, self.skip_months).and_then(|end| {
            months_before(end, self.lookback_months).map(|start| (start, end))
        });
        let Some((start, end)) = anchors else {
            return f64::NAN;
        };

        let (Some(first), Some(last)) = (
            window.price_on_or_before(symbol, start),
            window.price_on_or_before(symbol, end),
        ) else {
            return f64::NAN;
        };
        if first.close <= 0.0 || !first.close.is_finite() || !last.close.is_finite() {
            return f64::NAN;
        }
        last.close / first.close - 1.0
    }
}

impl SignalFunction for MomentumSignal {
    fn score(&self, window: &PriceWindow<'_>, universe: &Universe) -> Scores {
        universe
            .symbols()
            .map(|symbol| (symbol.to_string(), self.score_symbol(window, symbol)))
            .collect()
    }
}
