//! CSV report adapter.
//!
//! `write(result, "out/run.csv")` produces:
//!
//! - `out/run.csv`: one row per rebalance date
//! - `out/run_weights.csv`: composite weights in long form (`date,symbol,weight`)
//! - `out/run_summary.csv`: a single metrics row
//! - `out/run_degraded.csv`: the degraded-date ledger

use crate::domain::backtest::{BacktestResult, RunState};
use crate::domain::error::VintageError;
use crate::ports::report_port::ReportPort;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct RecordRow<'a> {
    date: NaiveDate,
    weights_ref: &'a str,
    period_return: Option<f64>,
    turnover: Option<f64>,
    equity: f64,
    active_vintages: usize,
    long_exposure: f64,
    short_exposure: f64,
}

#[derive(Debug, Serialize)]
struct WeightRow<'a> {
    date: NaiveDate,
    symbol: &'a str,
    weight: f64,
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    state: &'static str,
    valid: bool,
    periods: usize,
    total_return: f64,
    cagr: f64,
    annualized_volatility: f64,
    sharpe_ratio: f64,
    max_drawdown: f64,
    max_drawdown_duration: usize,
    avg_turnover: f64,
    final_equity: f64,
    degraded_dates: usize,
}

#[derive(Debug, Serialize)]
struct DegradedRow<'a> {
    date: NaiveDate,
    reason: &'a str,
    symbols: String,
}

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// `dir/stem.ext` → `dir/stem_suffix.csv`.
pub fn sibling_path(output_path: &Path, suffix: &str) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backtest".to_string());
    output_path.with_file_name(format!("{stem}_{suffix}.csv"))
}

fn state_label(state: RunState) -> &'static str {
    match state {
        RunState::Init => "init",
        RunState::Running => "running",
        RunState::Complete => "complete",
        RunState::Failed => "failed",
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<(), VintageError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_err(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| csv_err(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_err(path: &Path, e: csv::Error) -> VintageError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => VintageError::Io(io),
        other => VintageError::Data {
            reason: format!("failed to write {}: {:?}", path.display(), other),
        },
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_path: &str) -> Result<(), VintageError> {
        let records_path = Path::new(output_path);
        if let Some(parent) = records_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let weights_path = sibling_path(records_path, "weights");
        let weights_file = weights_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        write_rows(
            records_path,
            result.records.iter().map(|r| RecordRow {
                date: r.date,
                weights_ref: &weights_file,
                period_return: r.period_return,
                turnover: r.turnover,
                equity: r.equity,
                active_vintages: r.active_vintages,
                long_exposure: r.long_exposure,
                short_exposure: r.short_exposure,
            }),
        )?;

        write_rows(
            &weights_path,
            result.records.iter().flat_map(|r| {
                r.weights.iter().map(move |(symbol, &weight)| WeightRow {
                    date: r.date,
                    symbol,
                    weight,
                })
            }),
        )?;

        let m = &result.metrics;
        write_rows(
            &sibling_path(records_path, "summary"),
            [SummaryRow {
                state: state_label(result.state),
                valid: result.is_valid(),
                periods: m.periods,
                total_return: m.total_return,
                cagr: m.cagr,
                annualized_volatility: m.annualized_volatility,
                sharpe_ratio: m.sharpe_ratio,
                max_drawdown: m.max_drawdown,
                max_drawdown_duration: m.max_drawdown_duration,
                avg_turnover: m.avg_turnover,
                final_equity: result.final_equity(),
                degraded_dates: result.degraded.len(),
            }],
        )?;

        let degraded_path = sibling_path(records_path, "degraded");
        if result.degraded.is_empty() {
            // header only
            std::fs::write(&degraded_path, "date,reason,symbols\n")?;
        } else {
            write_rows(
                &degraded_path,
                result.degraded.iter().map(|e| DegradedRow {
                    date: e.date,
                    reason: &e.reason,
                    symbols: e.symbols.join(" "),
                }),
            )?;
        }

        tracing::info!(path = %records_path.display(), records = result.records.len(), "report written");
        Ok(())
    }
}
