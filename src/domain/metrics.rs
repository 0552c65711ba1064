//! Performance statistics over a completed run.

use crate::domain::backtest::BacktestRecord;

/// Rebalance periods per year; the engine rebalances monthly.
pub const PERIODS_PER_YEAR: f64 = 12.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub total_return: f64,
    pub cagr: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// Longest run of periods spent below a prior equity peak.
    pub max_drawdown_duration: usize,
    pub avg_turnover: f64,
    /// Number of periods that produced a return.
    pub periods: usize,
}

impl Metrics {
    pub fn compute(records: &[BacktestRecord], risk_free_rate: f64) -> Self {
        let returns: Vec<f64> = records.iter().filter_map(|r| r.period_return).collect();
        let turnovers: Vec<f64> = records.iter().filter_map(|r| r.turnover).collect();
        let equity: Vec<f64> = records.iter().map(|r| r.equity).collect();

        let final_equity = equity.last().copied().unwrap_or(1.0);
        let total_return = final_equity - 1.0;

        let periods = returns.len();
        let cagr = if periods == 0 {
            0.0
        } else if final_equity <= 0.0 {
            // wiped out
            -1.0
        } else {
            final_equity.powf(PERIODS_PER_YEAR / periods as f64) - 1.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(&equity);
        let (annualized_volatility, sharpe_ratio) =
            compute_risk_adjusted(&returns, risk_free_rate / PERIODS_PER_YEAR);

        let avg_turnover = if turnovers.is_empty() {
            0.0
        } else {
            turnovers.iter().sum::<f64>() / turnovers.len() as f64
        };

        Metrics {
            total_return,
            cagr,
            annualized_volatility,
            sharpe_ratio,
            max_drawdown,
            max_drawdown_duration,
            avg_turnover,
            periods,
        }
    }
}

fn compute_drawdown(equity: &[f64]) -> (f64, usize) {
    let Some(&first) = equity.first() else {
        return (0.0, 0);
    };

    let mut peak = first;
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0usize;
    let mut current_duration = 0usize;

    for &value in equity {
        if value >= peak {
            peak = value;
            current_duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak);
            current_duration += 1;
            max_duration = max_duration.max(current_duration);
        }
    }

    (max_dd, max_duration)
}

/// Annualized sample volatility and Sharpe ratio.
fn compute_risk_adjusted(returns: &[f64], period_rf: f64) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stddev = variance.sqrt();

    let volatility = stddev * PERIODS_PER_YEAR.sqrt();
    let sharpe = if stddev > 0.0 {
        (mean - period_rf) / stddev * PERIODS_PER_YEAR.sqrt()
    } else {
        0.0
    };
    (volatility, sharpe)
}
