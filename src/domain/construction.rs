//! Turning a long/short selection into a signed weight vector.

use crate::domain::vintage::Weights;

pub trait PortfolioConstructor {
    /// Positive weights for `long`, negative for `short`, each leg summing
    /// in absolute value to its exposure.
    fn construct(
        &self,
        long: &[String],
        short: &[String],
        long_exposure: f64,
        short_exposure: f64,
    ) -> Weights;
}

impl<F> PortfolioConstructor for F
where
    F: Fn(&[String], &[String], f64, f64) -> Weights,
{
    fn construct(
        &self,
        long: &[String],
        short: &[String],
        long_exposure: f64,
        short_exposure: f64,
    ) -> Weights {
        self(long, short, long_exposure, short_exposure)
    }
}

/// Splits each leg's exposure evenly across its names. A one-sided
/// selection yields no weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EqualWeightConstructor;

impl PortfolioConstructor for EqualWeightConstructor {
    fn construct(
        &self,
        long: &[String],
        short: &[String],
        long_exposure: f64,
        short_exposure: f64,
    ) -> Weights {
        let mut weights = Weights::new();
        if long.is_empty() || short.is_empty() {
            return weights;
        }
        let long_weight = long_exposure / long.len() as f64;
        for symbol in long {
            *weights.entry(symbol.clone()).or_insert(0.0) += long_weight;
        }
        let short_weight = short_exposure / short.len() as f64;
        for symbol in short {
            *weights.entry(symbol.clone()).or_insert(0.0) -= short_weight;
        }
        weights
    }
}
