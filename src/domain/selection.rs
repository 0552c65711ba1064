//! Ranking scores into long and short candidate sets.

use crate::domain::signal::Scores;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub long: Vec<String>,
    pub short: Vec<String>,
}

impl Selection {
    /// True when either leg is empty; such a selection cannot form a
    /// long/short vintage.
    pub fn is_incomplete(&self) -> bool {
        self.long.is_empty() || self.short.is_empty()
    }
}

pub trait SelectionFunction {
    fn select(&self, scores: &Scores, fraction: f64) -> Selection;
}

impl<F> SelectionFunction for F
where
    F: Fn(&Scores, f64) -> Selection,
{
    fn select(&self, scores: &Scores, fraction: f64) -> Selection {
        self(scores, fraction)
    }
}

const LEG_SIZE_TOLERANCE: f64 = 1e-9;

/// Top `fraction` of finite scores long, bottom `fraction` short.
///
/// With fewer than `1 / fraction` candidates the count per leg would round to
/// zero; as long as two candidates exist each leg still gets one. A leg never
/// takes more than half the candidates, so the legs are disjoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuantileSelection;

impl SelectionFunction for QuantileSelection {
    fn select(&self, scores: &Scores, fraction: f64) -> Selection {
        let mut ranked: Vec<(&String, f64)> = scores
            .iter()
            .filter(|(_, s)| s.is_finite())
            .map(|(symbol, &s)| (symbol, s))
            .collect();

        let n = ranked.len();
        if n < 2 {
            return Selection::default();
        }

        // Descending by score; symbol order breaks ties so equal inputs rank identically.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        // 100 × 0.29 is 28.999999999999996 in binary; nudge before flooring.
        let per_leg = ((n as f64 * fraction + LEG_SIZE_TOLERANCE).floor() as usize).clamp(1, n / 2);

        let long = ranked[..per_leg].iter().map(|(s, _)| (*s).clone()).collect();
        let short = ranked[n - per_leg..]
            .iter()
            .rev()
            .map(|(s, _)| (*s).clone())
            .collect();
        Selection { long, short }
    }
}
