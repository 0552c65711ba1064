//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{Backtest, BacktestConfig, BacktestResult, ErrorPolicy};
use crate::domain::calendar::months_before;
use crate::domain::config_validation::{
    self, DEFAULT_EXPOSURE, DEFAULT_HOLDING_MONTHS, DEFAULT_LOOKBACK_MONTHS,
    DEFAULT_SELECTION_FRACTION, DEFAULT_SKIP_MONTHS, parse_date,
};
use crate::domain::construction::EqualWeightConstructor;
use crate::domain::data_quality::validate_prices;
use crate::domain::error::VintageError;
use crate::domain::prices::PriceMatrix;
use crate::domain::selection::QuantileSelection;
use crate::domain::signal::MomentumSignal;
use crate::domain::universe::{ConstituentHistory, MembershipInterval, UniverseResolver};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(
    name = "vintage",
    about = "Point-in-time momentum backtester with overlapping holding periods"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Records CSV; summary, weights and degraded-date files are written next to it
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run price data quality checks for the configured universe
    CheckData {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the eligible universe on a date
    Universe {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        date: NaiveDate,
    },
    /// List symbols available from the data source
    ListSymbols {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config)
            } else {
                run_backtest(&config, output.as_deref())
            }
        }
        Command::Validate { config } => run_validate(&config),
        Command::CheckData { config } => run_check_data(&config),
        Command::Universe { config, date } => run_universe(&config, date),
        Command::ListSymbols { config } => run_list_symbols(&config),
    }
}

/// Prints the error and converts it into the process exit code.
fn fail(err: &VintageError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

/// Validates the backtest, strategy and universe sections and builds the
/// typed configuration. Keys left out take their documented defaults.
pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, VintageError> {
    config_validation::validate_backtest_config(adapter)?;
    config_validation::validate_strategy_config(adapter)?;
    config_validation::validate_universe_config(adapter)?;

    let start_date = parse_date(
        adapter.get_string("backtest", "start_date").as_deref(),
        "backtest",
        "start_date",
    )?;
    let end_date = parse_date(
        adapter.get_string("backtest", "end_date").as_deref(),
        "backtest",
        "end_date",
    )?;
    let covered_through = adapter
        .get_string("universe", "covered_through")
        .map(|s| parse_date(Some(&s), "universe", "covered_through"))
        .transpose()?;
    let error_policy = adapter
        .get_string("backtest", "error_policy")
        .map(|s| s.parse::<ErrorPolicy>())
        .transpose()?
        .unwrap_or_default();
    let universe_id = adapter
        .get_string("universe", "id")
        .map(|s| s.trim().to_string())
        .ok_or_else(|| VintageError::config_missing("universe", "id"))?;

    let lookback_months = adapter.get_int("strategy", "lookback_months", DEFAULT_LOOKBACK_MONTHS) as u32;
    Ok(BacktestConfig {
        universe_id,
        start_date,
        end_date,
        lookback_months,
        skip_months: adapter.get_int("strategy", "skip_months", DEFAULT_SKIP_MONTHS) as u32,
        holding_months: adapter.get_int("strategy", "holding_months", DEFAULT_HOLDING_MONTHS) as usize,
        selection_fraction: adapter.get_double(
            "strategy",
            "selection_fraction",
            DEFAULT_SELECTION_FRACTION,
        ),
        long_exposure: adapter.get_double("strategy", "long_exposure", DEFAULT_EXPOSURE),
        short_exposure: adapter.get_double("strategy", "short_exposure", DEFAULT_EXPOSURE),
        min_history_months: adapter.get_int("strategy", "min_history_months", lookback_months as i64)
            as u32,
        error_policy,
        risk_free_rate: adapter.get_double("backtest", "risk_free_rate", 0.0),
        renormalize_composite: adapter.get_bool("backtest", "renormalize_composite", false),
        covered_through,
    })
}

/// Opens the data source named by `[data] source`.
pub fn open_data_port(config: &dyn ConfigPort) -> Result<Box<dyn DataPort>, VintageError> {
    config_validation::validate_data_config(config)?;
    let source = config
        .get_string("data", "source")
        .unwrap_or_else(|| "csv".to_string());

    match source.trim() {
        "sqlite" => open_sqlite(config),
        _ => {
            let dir = config
                .get_string("data", "csv_dir")
                .ok_or_else(|| VintageError::config_missing("data", "csv_dir"))?;
            Ok(Box::new(CsvAdapter::new(PathBuf::from(dir))))
        }
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &dyn ConfigPort) -> Result<Box<dyn DataPort>, VintageError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;
    Ok(Box::new(SqliteAdapter::from_config(config)?))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &dyn ConfigPort) -> Result<Box<dyn DataPort>, VintageError> {
    Err(VintageError::config_invalid(
        "data",
        "source",
        "sqlite feature is required for source = sqlite",
    ))
}

/// First date whose prices can influence the run: enough history before
/// `start_date` for both the signal lookback and the eligibility filter.
pub fn history_start(config: &BacktestConfig) -> NaiveDate {
    let months = config
        .min_history_months
        .max(config.lookback_months + config.skip_months)
        + 1;
    months_before(config.start_date, months).unwrap_or(NaiveDate::MIN)
}

/// Fetches every symbol into a price matrix. Symbols whose fetch fails are
/// skipped with a warning.
pub fn load_price_matrix(
    data_port: &dyn DataPort,
    symbols: &[String],
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<PriceMatrix, VintageError> {
    let mut bars = Vec::new();
    let mut skipped = 0usize;
    for symbol in symbols {
        match data_port.fetch_prices(symbol, start_date, end_date) {
            Ok(fetched) => bars.extend(fetched),
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "skipping symbol");
                eprintln!("warning: skipping {} ({})", symbol, e);
                skipped += 1;
            }
        }
    }

    let prices = PriceMatrix::from_bars(bars);
    if prices.is_empty() {
        return Err(VintageError::InsufficientData {
            subject: "price matrix".to_string(),
            date: start_date,
            reason: format!("no prices loaded for {} symbol(s)", symbols.len()),
        });
    }
    tracing::info!(
        symbols = prices.symbol_count(),
        skipped,
        dates = prices.dates().len(),
        "price matrix loaded"
    );
    Ok(prices)
}

/// Every symbol that was ever a member of the index.
pub fn member_symbols(intervals: &[MembershipInterval]) -> Vec<String> {
    intervals
        .iter()
        .map(|i| i.symbol.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn build_resolver<'a>(
    data_port: &dyn DataPort,
    prices: &'a PriceMatrix,
    intervals: Vec<MembershipInterval>,
    config: &BacktestConfig,
) -> Result<UniverseResolver<'a>, VintageError> {
    let delistings = data_port.fetch_delistings()?;
    let history = ConstituentHistory::new(
        config.universe_id.clone(),
        intervals,
        delistings,
        config.covered_through(),
    );
    Ok(UniverseResolver::new(prices).with_history(history))
}

fn run_backtest(config_path: &Path, output_path: Option<&Path>) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    // Stage 2: Open data source
    let data_port = match open_data_port(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    run_backtest_pipeline(data_port.as_ref(), &bt_config, output_path)
}

pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    bt_config: &BacktestConfig,
    output_path: Option<&Path>,
) -> ExitCode {
    // Stage 3: Memberships and prices
    let intervals = match data_port.fetch_memberships(&bt_config.universe_id) {
        Ok(i) => i,
        Err(e) => return fail(&e),
    };
    let symbols = member_symbols(&intervals);
    eprintln!(
        "Universe {}: {} symbols ever listed",
        bt_config.universe_id,
        symbols.len()
    );

    let prices = match load_price_matrix(
        data_port,
        &symbols,
        history_start(bt_config),
        bt_config.end_date,
    ) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    // Stage 4: Data quality (advisory)
    let quality = validate_prices(&prices, true);
    if !quality.is_valid {
        eprintln!("warning: {}", quality.summary);
    }

    // Stage 5: Run
    let resolver = match build_resolver(data_port, &prices, intervals, bt_config) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };
    let mut backtest = Backtest::new(
        bt_config.clone(),
        &prices,
        &resolver,
        MomentumSignal::new(bt_config.lookback_months, bt_config.skip_months),
        QuantileSelection,
        EqualWeightConstructor,
    );
    let dates = backtest.rebalance_dates();
    eprintln!(
        "Running backtest: {} to {}, {} rebalance dates, K = {}",
        bt_config.start_date,
        bt_config.end_date,
        dates.len(),
        bt_config.holding_months
    );

    let output = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("backtest.csv"));

    match backtest.run(&dates) {
        Ok(result) => {
            print_summary(&result);
            write_report(&result, &output)
        }
        Err(failure) => {
            eprintln!("error: {}", failure.error);
            if let Some(partial) = &failure.partial {
                eprintln!(
                    "Partial result ({} records) is not valid",
                    partial.records.len()
                );
                // the run's own error decides the exit code
                match CsvReportAdapter::new().write(partial, &output.to_string_lossy()) {
                    Ok(()) => eprintln!("Partial report written to: {}", output.display()),
                    Err(e) => {
                        tracing::warn!(error = %e, path = %output.display(), "partial report not written");
                        eprintln!("warning: partial report not written: {e}");
                    }
                }
            }
            (&failure).into()
        }
    }
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\n=== Results ===");
    eprintln!("Periods:          {}", m.periods);
    eprintln!("Total Return:     {:.2}%", m.total_return * 100.0);
    eprintln!("CAGR:             {:.2}%", m.cagr * 100.0);
    eprintln!("Volatility:       {:.2}%", m.annualized_volatility * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown * 100.0);
    eprintln!("Avg Turnover:     {:.1}%", m.avg_turnover * 100.0);

    if !result.degraded.is_empty() {
        eprintln!("\n=== Degraded Dates ({}) ===", result.degraded.len());
        for entry in &result.degraded {
            eprintln!("  {}: {}", entry.date, entry.reason);
        }
    }
}

fn write_report(result: &BacktestResult, output: &Path) -> ExitCode {
    match CsvReportAdapter::new().write(result, &output.to_string_lossy()) {
        Ok(()) => {
            eprintln!("\nReport written to: {}", output.display());
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

pub fn run_dry_run(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    if let Err(e) = config_validation::validate_data_config(&adapter) {
        return fail(&e);
    }
    if let Err(e) = bt_config.validate() {
        return fail(&e);
    }
    eprintln!("Config validated successfully");

    eprintln!("\nStrategy:");
    eprintln!(
        "  momentum {}-{} months, top/bottom {:.0}%",
        bt_config.lookback_months,
        bt_config.skip_months,
        bt_config.selection_fraction * 100.0
    );
    eprintln!("  holding {} month(s)", bt_config.holding_months);
    eprintln!(
        "  exposure +{} / -{}",
        bt_config.long_exposure, bt_config.short_exposure
    );
    eprintln!("  min history {} month(s)", bt_config.min_history_months);
    eprintln!("  error policy {}", bt_config.error_policy);

    eprintln!("\nUniverse:");
    eprintln!("  id: {}", bt_config.universe_id);
    eprintln!("  covered through: {}", bt_config.covered_through());

    eprintln!("\nDry run complete: configuration is valid");
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = config_validation::validate_all(&adapter) {
        return fail(&e);
    }
    match build_backtest_config(&adapter).and_then(|c| c.validate()) {
        Ok(()) => {
            eprintln!("Configuration is valid.");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_check_data(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let data_port = match open_data_port(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let symbols = match data_port
        .fetch_memberships(&bt_config.universe_id)
        .map(|intervals| member_symbols(&intervals))
    {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let prices = match load_price_matrix(
        data_port.as_ref(),
        &symbols,
        history_start(&bt_config),
        bt_config.end_date,
    ) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let report = validate_prices(&prices, true);
    println!("{report}");
    if report.is_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(6)
    }
}

fn run_universe(config_path: &Path, date: NaiveDate) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let data_port = match open_data_port(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let intervals = match data_port.fetch_memberships(&bt_config.universe_id) {
        Ok(i) => i,
        Err(e) => return fail(&e),
    };
    let symbols = member_symbols(&intervals);
    let prices = match load_price_matrix(data_port.as_ref(), &symbols, NaiveDate::MIN, date) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let resolver = match build_resolver(data_port.as_ref(), &prices, intervals, &bt_config) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    match resolver.resolve(&bt_config.universe_id, date, bt_config.min_history_months) {
        Ok(universe) => {
            for member in &universe.members {
                println!("{}\t{}", member.symbol, member.included_since);
            }
            eprintln!(
                "{} eligible symbols in {} on {}",
                universe.count(),
                universe.index_id,
                date
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_list_symbols(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let data_port = match open_data_port(&config) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let symbols = match data_port.list_symbols() {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    if symbols.is_empty() {
        eprintln!("No symbols found");
    } else {
        for symbol in &symbols {
            match data_port.get_data_range(symbol) {
                Ok(Some((first, last, count))) => {
                    println!("{symbol}\t{count} rows\t{first} to {last}")
                }
                _ => println!("{symbol}"),
            }
        }
        eprintln!("{} symbols found", symbols.len());
    }
    ExitCode::SUCCESS
}
