//! Weight vectors and single-formation sub-portfolios (vintages).

use crate::domain::error::VintageError;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Symbol → signed weight. Ordered so that every derived value iterates
/// deterministically.
pub type Weights = BTreeMap<String, f64>;

/// Tolerance used by the exposure invariant.
pub const EXPOSURE_TOLERANCE: f64 = 1e-6;

/// Sum of positive and (absolute) sum of negative weights.
pub fn leg_exposures(weights: &Weights) -> (f64, f64) {
    weights.values().fold((0.0, 0.0), |(long, short), &w| {
        if w > 0.0 {
            (long + w, short)
        } else {
            (long, short - w)
        }
    })
}

/// `|Σ positive − long| < tol` and `|Σ negative + short| < tol`.
pub fn satisfies_exposure(weights: &Weights, long_exposure: f64, short_exposure: f64) -> bool {
    let (long, short) = leg_exposures(weights);
    (long - long_exposure).abs() < EXPOSURE_TOLERANCE
        && (short - short_exposure).abs() < EXPOSURE_TOLERANCE
}

/// A weight set formed at one rebalance date, active for `holding_periods`
/// periods starting with its formation period.
#[derive(Debug, Clone, PartialEq)]
pub struct Vintage {
    pub formation_date: NaiveDate,
    pub formation_period: usize,
    pub holding_periods: usize,
    pub weights: Weights,
}

impl Vintage {
    /// Rejects weight vectors containing NaN or infinite values.
    pub fn new(
        formation_date: NaiveDate,
        formation_period: usize,
        holding_periods: usize,
        weights: Weights,
    ) -> Result<Self, VintageError> {
        if let Some((symbol, &value)) = weights.iter().find(|(_, w)| !w.is_finite()) {
            return Err(VintageError::NonFiniteWeight {
                symbol: symbol.clone(),
                date: formation_date,
                value,
            });
        }
        Ok(Self {
            formation_date,
            formation_period,
            holding_periods,
            weights,
        })
    }

    /// First period index at which this vintage is no longer active.
    pub fn expiry_period(&self) -> usize {
        self.formation_period + self.holding_periods
    }

    pub fn is_active_at(&self, period: usize) -> bool {
        period >= self.formation_period && period < self.expiry_period()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2015, 6, 30).unwrap()
    }

    fn weights(pairs: &[(&str, f64)]) -> Weights {
        pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect()
    }

    #[test]
    fn leg_exposures_splits_signs() {
        let w = weights(&[("A", 0.5), ("B", 0.5), ("C", -0.25), ("D", -0.75)]);
        let (long, short) = leg_exposures(&w);
        assert!((long - 1.0).abs() < 1e-12);
        assert!((short - 1.0).abs() < 1e-12);
        assert!(satisfies_exposure(&w, 1.0, 1.0));
        assert!(!satisfies_exposure(&w, 1.0, 0.5));
    }

    #[test]
    fn new_rejects_nan() {
        let err = Vintage::new(d(), 0, 3, weights(&[("A", f64::NAN)])).unwrap_err();
        assert!(matches!(err, VintageError::NonFiniteWeight { symbol, .. } if symbol == "A"));
    }

    #[test]
    fn new_rejects_infinite() {
        let err = Vintage::new(d(), 0, 3, weights(&[("A", 1.0), ("B", f64::NEG_INFINITY)]))
            .unwrap_err();
        assert!(matches!(err, VintageError::NonFiniteWeight { symbol, .. } if symbol == "B"));
    }

    #[test]
    fn active_window_is_k_periods() {
        let v = Vintage::new(d(), 4, 3, weights(&[("A", 1.0)])).unwrap();
        assert_eq!(v.expiry_period(), 7);
        assert!(!v.is_active_at(3));
        assert!(v.is_active_at(4));
        assert!(v.is_active_at(6));
        assert!(!v.is_active_at(7));
    }
}
