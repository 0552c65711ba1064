//! Backtest orchestration.
//!
//! [`Backtest`] drives the per-date loop: resolve the universe, score it,
//! select both legs, construct a vintage, fold it into the overlapping book
//! and account for the period. The loop itself is sequential; only universe
//! snapshots are resolved ahead of time in parallel.

use crate::domain::accounting::ReturnAccountant;
use crate::domain::calendar::{month_end_dates, validate_rebalance_dates};
use crate::domain::construction::PortfolioConstructor;
use crate::domain::error::VintageError;
use crate::domain::metrics::Metrics;
use crate::domain::overlap::{OverlapStateManager, Renormalization};
use crate::domain::prices::{PriceMatrix, PriceRow};
use crate::domain::selection::SelectionFunction;
use crate::domain::signal::SignalFunction;
use crate::domain::universe::{Universe, UniverseResolver};
use crate::domain::vintage::{Vintage, Weights, leg_exposures, satisfies_exposure};
use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;

/// What to do when a single rebalance date cannot form a vintage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    #[default]
    Strict,
    SkipAndLog,
}

impl FromStr for ErrorPolicy {
    type Err = VintageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "strict" => Ok(ErrorPolicy::Strict),
            "skip-and-log" => Ok(ErrorPolicy::SkipAndLog),
            other => Err(VintageError::config_invalid(
                "backtest",
                "error_policy",
                format!("expected 'strict' or 'skip-and-log', got '{other}'"),
            )),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Strict => write!(f, "strict"),
            ErrorPolicy::SkipAndLog => write!(f, "skip-and-log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub universe_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub lookback_months: u32,
    pub skip_months: u32,
    pub holding_months: usize,
    pub selection_fraction: f64,
    pub long_exposure: f64,
    pub short_exposure: f64,
    pub min_history_months: u32,
    pub error_policy: ErrorPolicy,
    pub risk_free_rate: f64,
    pub renormalize_composite: bool,
    /// Last date the membership history is known to be complete. Defaults to
    /// `end_date` when unset.
    pub covered_through: Option<NaiveDate>,
}

impl BacktestConfig {
    /// 12-1 momentum, deciles, six-month holding, dollar-neutral.
    pub fn new(universe_id: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            universe_id: universe_id.into(),
            start_date,
            end_date,
            lookback_months: 12,
            skip_months: 1,
            holding_months: 6,
            selection_fraction: 0.1,
            long_exposure: 1.0,
            short_exposure: 1.0,
            min_history_months: 12,
            error_policy: ErrorPolicy::Strict,
            risk_free_rate: 0.0,
            renormalize_composite: false,
            covered_through: None,
        }
    }

    pub fn covered_through(&self) -> NaiveDate {
        self.covered_through.unwrap_or(self.end_date)
    }

    pub fn validate(&self) -> Result<(), VintageError> {
        if self.universe_id.trim().is_empty() {
            return Err(VintageError::config_invalid("universe", "id", "must not be empty"));
        }
        if self.start_date > self.end_date {
            return Err(VintageError::config_invalid(
                "backtest",
                "start_date",
                format!("{} is after end_date {}", self.start_date, self.end_date),
            ));
        }
        if self.lookback_months < 1 {
            return Err(VintageError::config_invalid("strategy", "lookback_months", "must be at least 1"));
        }
        if self.holding_months < 1 {
            return Err(VintageError::config_invalid("strategy", "holding_months", "must be at least 1"));
        }
        if !(self.selection_fraction > 0.0 && self.selection_fraction <= 0.5) {
            return Err(VintageError::config_invalid(
                "strategy",
                "selection_fraction",
                format!("{} is outside (0, 0.5]", self.selection_fraction),
            ));
        }
        if self.min_history_months < self.lookback_months {
            return Err(VintageError::config_invalid(
                "strategy",
                "min_history_months",
                format!(
                    "{} is shorter than lookback_months {}",
                    self.min_history_months, self.lookback_months
                ),
            ));
        }
        for (key, value) in [
            ("long_exposure", self.long_exposure),
            ("short_exposure", self.short_exposure),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(VintageError::config_invalid(
                    "strategy",
                    key,
                    format!("{value} must be finite and non-negative"),
                ));
            }
        }
        if !(0.0..1.0).contains(&self.risk_free_rate) {
            return Err(VintageError::config_invalid(
                "backtest",
                "risk_free_rate",
                format!("{} is outside [0, 1)", self.risk_free_rate),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRecord {
    pub date: NaiveDate,
    /// Composite weights held from this date to the next.
    pub weights: Weights,
    /// `None` on the first date.
    pub period_return: Option<f64>,
    pub turnover: Option<f64>,
    pub equity: f64,
    pub active_vintages: usize,
    pub long_exposure: f64,
    pub short_exposure: f64,
}

/// A rebalance date that did not run cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradedDate {
    pub date: NaiveDate,
    pub reason: String,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub records: Vec<BacktestRecord>,
    pub metrics: Metrics,
    pub state: RunState,
    pub degraded: Vec<DegradedDate>,
}

impl BacktestResult {
    /// Only a completed run is valid; a partial result from a failed run is not.
    pub fn is_valid(&self) -> bool {
        self.state == RunState::Complete
    }

    pub fn final_equity(&self) -> f64 {
        self.records.last().map(|r| r.equity).unwrap_or(1.0)
    }
}

/// A fatal error together with whatever the run produced before it.
#[derive(Debug, thiserror::Error)]
#[error("backtest failed: {error}")]
pub struct BacktestFailure {
    #[source]
    pub error: VintageError,
    pub partial: Option<BacktestResult>,
}

impl From<VintageError> for BacktestFailure {
    fn from(error: VintageError) -> Self {
        Self { error, partial: None }
    }
}

impl From<&BacktestFailure> for std::process::ExitCode {
    fn from(failure: &BacktestFailure) -> Self {
        (&failure.error).into()
    }
}

pub struct Backtest<'a, S, P, C> {
    config: BacktestConfig,
    prices: &'a PriceMatrix,
    resolver: &'a UniverseResolver<'a>,
    signal: S,
    selection: P,
    constructor: C,
    state: RunState,
}

impl<'a, S, P, C> Backtest<'a, S, P, C>
where
    S: SignalFunction,
    P: SelectionFunction,
    C: PortfolioConstructor,
{
    pub fn new(
        config: BacktestConfig,
        prices: &'a PriceMatrix,
        resolver: &'a UniverseResolver<'a>,
        signal: S,
        selection: P,
        constructor: C,
    ) -> Self {
        Self {
            config,
            prices,
            resolver,
            signal,
            selection,
            constructor,
            state: RunState::Init,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Month-end trading dates of the price matrix within the configured range.
    pub fn rebalance_dates(&self) -> Vec<NaiveDate> {
        month_end_dates(&self.prices.dates(), self.config.start_date, self.config.end_date)
    }

    /// Runs over the configured month-end calendar.
    pub fn run_monthly(&mut self) -> Result<BacktestResult, BacktestFailure> {
        let dates = self.rebalance_dates();
        self.run(&dates)
    }

    /// Validates the configuration and the date sequence, then runs the loop.
    /// A failure past validation carries the partial result.
    pub fn run(&mut self, dates: &[NaiveDate]) -> Result<BacktestResult, BacktestFailure> {
        self.state = RunState::Init;
        if let Err(error) = self
            .config
            .validate()
            .and_then(|()| validate_rebalance_dates(dates))
        {
            tracing::error!(%error, "backtest configuration rejected");
            self.state = RunState::Failed;
            return Err(error.into());
        }

        self.state = RunState::Running;
        let outcome = self.execute(dates);
        self.state = match &outcome {
            Ok(_) => RunState::Complete,
            Err(_) => RunState::Failed,
        };
        outcome
    }

    fn execute(&self, dates: &[NaiveDate]) -> Result<BacktestResult, BacktestFailure> {
        let mut overlap = OverlapStateManager::new(self.config.holding_months);
        if self.config.renormalize_composite {
            overlap = overlap.with_renormalization(Renormalization {
                long_exposure: self.config.long_exposure,
                short_exposure: self.config.short_exposure,
            });
        }
        let mut accountant = ReturnAccountant::new();
        let mut records: Vec<BacktestRecord> = Vec::with_capacity(dates.len());
        let mut degraded: Vec<DegradedDate> = Vec::new();

        tracing::info!(
            universe = %self.config.universe_id,
            dates = dates.len(),
            holding_months = self.config.holding_months,
            policy = %self.config.error_policy,
            "starting backtest"
        );
        let mut universes = self.resolver.prefetch(
            &self.config.universe_id,
            dates,
            self.config.min_history_months,
        );

        let empty_row = PriceRow::new();
        let mut prev_weights = Weights::new();

        for (i, &date) in dates.iter().enumerate() {
            let universe = universes.remove(&date).unwrap_or_else(|| {
                self.resolver
                    .resolve(&self.config.universe_id, date, self.config.min_history_months)
            });

            let formed = universe.and_then(|u| self.form_vintage(date, overlap.period(), &u));
            let composite = match formed {
                Ok(vintage) => overlap.advance_vintage(vintage),
                Err(error) if error.is_recoverable() && self.config.error_policy == ErrorPolicy::SkipAndLog => {
                    let symbols = error.symbols().to_vec();
                    tracing::warn!(%date, %error, symbols = ?symbols, "rebalance degraded to empty vintage");
                    degraded.push(DegradedDate {
                        date,
                        reason: error.to_string(),
                        symbols,
                    });
                    overlap.advance(date, Weights::new())
                }
                Err(error) => {
                    tracing::error!(%date, %error, "backtest failed");
                    let metrics = Metrics::compute(&records, self.config.risk_free_rate);
                    return Err(BacktestFailure {
                        error,
                        partial: Some(BacktestResult {
                            records,
                            metrics,
                            state: RunState::Failed,
                            degraded,
                        }),
                    });
                }
            };

            let (period_return, turnover) = if i == 0 {
                (None, None)
            } else {
                let prev_date = dates[i - 1];
                let rows = self.prices.row(prev_date).zip(self.prices.row(date));
                let (prev_row, row) = rows.unwrap_or((&empty_row, &empty_row));
                let outcome = accountant.step(&prev_weights, &composite, prev_row, row);

                if rows.is_none() {
                    let error = VintageError::DateAlignment {
                        date: if self.prices.row(prev_date).is_none() { prev_date } else { date },
                    };
                    tracing::warn!(%date, %error, excluded = outcome.excluded.len(), "period return not computable");
                    degraded.push(DegradedDate {
                        date,
                        reason: error.to_string(),
                        symbols: outcome.excluded.clone(),
                    });
                } else if !outcome.excluded.is_empty() {
                    tracing::warn!(%date, symbols = ?outcome.excluded, "held symbols without prices excluded from return");
                    degraded.push(DegradedDate {
                        date,
                        reason: "held symbols lack a valid price".to_string(),
                        symbols: outcome.excluded.clone(),
                    });
                }
                (Some(outcome.period_return), Some(outcome.turnover))
            };

            let (long_exposure, short_exposure) = leg_exposures(&composite);
            tracing::debug!(
                %date,
                active_vintages = overlap.active_count(),
                holdings = composite.len(),
                equity = accountant.equity(),
                "rebalanced"
            );
            records.push(BacktestRecord {
                date,
                weights: composite.clone(),
                period_return,
                turnover,
                equity: accountant.equity(),
                active_vintages: overlap.active_count(),
                long_exposure,
                short_exposure,
            });
            prev_weights = composite;
        }

        let metrics = Metrics::compute(&records, self.config.risk_free_rate);
        tracing::info!(
            records = records.len(),
            degraded = degraded.len(),
            final_equity = accountant.equity(),
            cagr = metrics.cagr,
            "backtest complete"
        );
        Ok(BacktestResult {
            records,
            metrics,
            state: RunState::Complete,
            degraded,
        })
    }

    fn form_vintage(
        &self,
        date: NaiveDate,
        period: usize,
        universe: &Universe,
    ) -> Result<Vintage, VintageError> {
        if universe.is_empty() {
            return Err(VintageError::EmptyUniverse {
                index_id: universe.index_id.clone(),
                date,
            });
        }

        let scores = self.signal.score(&self.prices.window(date), universe);
        let selection = self.selection.select(&scores, self.config.selection_fraction);
        if selection.is_incomplete() {
            let unscored: Vec<String> = universe
                .symbols()
                .filter(|s| !scores.get(*s).is_some_and(|v| v.is_finite()))
                .map(str::to_string)
                .collect();
            return Err(VintageError::NoCandidates {
                date,
                scored: universe.count() - unscored.len(),
                unscored,
            });
        }

        let weights = self.constructor.construct(
            &selection.long,
            &selection.short,
            self.config.long_exposure,
            self.config.short_exposure,
        );
        let vintage = Vintage::new(date, period, self.config.holding_months, weights)?;
        if !satisfies_exposure(&vintage.weights, self.config.long_exposure, self.config.short_exposure) {
            let (long, short) = leg_exposures(&vintage.weights);
            tracing::warn!(%date, long, short, "vintage exposure differs from target");
        }
        Ok(vintage)
    }
}
