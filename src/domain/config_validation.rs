//! Configuration validation.
//!
//! Validates every configured key before any data is touched, so a typo
//! fails the run with a config error instead of a silent default.

use crate::domain::backtest::ErrorPolicy;
use crate::domain::error::VintageError;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use std::str::FromStr;

pub const DEFAULT_LOOKBACK_MONTHS: i64 = 12;
pub const DEFAULT_SKIP_MONTHS: i64 = 1;
pub const DEFAULT_HOLDING_MONTHS: i64 = 6;
pub const DEFAULT_SELECTION_FRACTION: f64 = 0.1;
pub const DEFAULT_EXPOSURE: f64 = 1.0;

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), VintageError> {
    validate_dates(config)?;
    validate_risk_free_rate(config)?;
    validate_error_policy(config)?;
    optional_bool(config, "backtest", "renormalize_composite")?;
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), VintageError> {
    let lookback = optional::<i64>(config, "strategy", "lookback_months")?.unwrap_or(DEFAULT_LOOKBACK_MONTHS);
    if lookback < 1 {
        return Err(VintageError::config_invalid(
            "strategy",
            "lookback_months",
            "lookback_months must be at least 1",
        ));
    }

    let skip = optional::<i64>(config, "strategy", "skip_months")?.unwrap_or(DEFAULT_SKIP_MONTHS);
    if skip < 0 {
        return Err(VintageError::config_invalid(
            "strategy",
            "skip_months",
            "skip_months must be non-negative",
        ));
    }

    let holding = optional::<i64>(config, "strategy", "holding_months")?.unwrap_or(DEFAULT_HOLDING_MONTHS);
    if holding < 1 {
        return Err(VintageError::config_invalid(
            "strategy",
            "holding_months",
            "holding_months must be at least 1",
        ));
    }

    let fraction =
        optional::<f64>(config, "strategy", "selection_fraction")?.unwrap_or(DEFAULT_SELECTION_FRACTION);
    if !(fraction > 0.0 && fraction <= 0.5) {
        return Err(VintageError::config_invalid(
            "strategy",
            "selection_fraction",
            "selection_fraction must be in (0, 0.5]",
        ));
    }

    for key in ["long_exposure", "short_exposure"] {
        let value = optional::<f64>(config, "strategy", key)?.unwrap_or(DEFAULT_EXPOSURE);
        if !value.is_finite() || value < 0.0 {
            return Err(VintageError::config_invalid(
                "strategy",
                key,
                format!("{key} must be finite and non-negative"),
            ));
        }
    }

    let min_history = optional::<i64>(config, "strategy", "min_history_months")?.unwrap_or(lookback);
    if min_history < lookback {
        return Err(VintageError::config_invalid(
            "strategy",
            "min_history_months",
            "min_history_months must be at least lookback_months",
        ));
    }
    Ok(())
}

pub fn validate_universe_config(config: &dyn ConfigPort) -> Result<(), VintageError> {
    match config.get_string("universe", "id") {
        Some(s) if !s.trim().is_empty() => {}
        _ => return Err(VintageError::config_missing("universe", "id")),
    }
    if let Some(value) = config.get_string("universe", "covered_through") {
        parse_date(Some(&value), "universe", "covered_through")?;
    }
    Ok(())
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), VintageError> {
    let source = config
        .get_string("data", "source")
        .unwrap_or_else(|| "csv".to_string());
    match source.trim() {
        "csv" => match config.get_string("data", "csv_dir") {
            Some(s) if !s.trim().is_empty() => Ok(()),
            _ => Err(VintageError::config_missing("data", "csv_dir")),
        },
        "sqlite" => match config.get_string("sqlite", "path") {
            Some(s) if !s.trim().is_empty() => {
                let pool = optional::<i64>(config, "sqlite", "pool_size")?.unwrap_or(4);
                if pool < 1 {
                    return Err(VintageError::config_invalid(
                        "sqlite",
                        "pool_size",
                        "pool_size must be at least 1",
                    ));
                }
                Ok(())
            }
            _ => Err(VintageError::config_missing("sqlite", "path")),
        },
        other => Err(VintageError::config_invalid(
            "data",
            "source",
            format!("unknown data source '{other}', expected csv or sqlite"),
        )),
    }
}

/// Runs every section validator.
pub fn validate_all(config: &dyn ConfigPort) -> Result<(), VintageError> {
    validate_backtest_config(config)?;
    validate_strategy_config(config)?;
    validate_universe_config(config)?;
    validate_data_config(config)
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), VintageError> {
    let value = optional::<f64>(config, "backtest", "risk_free_rate")?.unwrap_or(0.0);
    if !(0.0..1.0).contains(&value) {
        return Err(VintageError::config_invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_error_policy(config: &dyn ConfigPort) -> Result<(), VintageError> {
    if let Some(value) = config.get_string("backtest", "error_policy") {
        value.parse::<ErrorPolicy>()?;
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), VintageError> {
    let start_str = config.get_string("backtest", "start_date");
    let end_str = config.get_string("backtest", "end_date");

    let start_date = parse_date(start_str.as_deref(), "backtest", "start_date")?;
    let end_date = parse_date(end_str.as_deref(), "backtest", "end_date")?;

    if start_date >= end_date {
        return Err(VintageError::config_invalid(
            "backtest",
            "start_date",
            "start_date must be before end_date",
        ));
    }
    Ok(())
}

pub fn parse_date(value: Option<&str>, section: &str, field: &str) -> Result<NaiveDate, VintageError> {
    match value {
        None => Err(VintageError::config_missing(section, field)),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            VintageError::config_invalid(
                section,
                field,
                format!("invalid {field} format, expected YYYY-MM-DD"),
            )
        }),
    }
}

fn optional<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, VintageError> {
    config
        .get_string(section, key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                VintageError::config_invalid(section, key, format!("cannot parse '{}'", raw.trim()))
            })
        })
        .transpose()
}

fn optional_bool(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<bool>, VintageError> {
    config
        .get_string(section, key)
        .map(|raw| match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(VintageError::config_invalid(
                section,
                key,
                format!("expected a boolean, got '{other}'"),
            )),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const DATES: &str = "[backtest]\nstart_date = 2005-01-01\nend_date = 2015-12-31\n";

    #[test]
    fn valid_full_config_passes() {
        let config = make_config(
            r#"
[backtest]
start_date = 2005-01-01
end_date = 2015-12-31
risk_free_rate = 0.02
error_policy = skip-and-log
renormalize_composite = false

[strategy]
lookback_months = 12
skip_months = 1
holding_months = 6
selection_fraction = 0.1
long_exposure = 1.0
short_exposure = 1.0
min_history_months = 13

[universe]
id = SP500
covered_through = 2015-12-31

[data]
source = csv
csv_dir = /data/prices
"#,
        );
        assert!(validate_all(&config).is_ok());
    }

    #[test]
    fn strategy_defaults_are_valid() {
        assert!(validate_strategy_config(&make_config("[strategy]\n")).is_ok());
    }

    #[test]
    fn missing_end_date_fails() {
        let config = make_config("[backtest]\nstart_date = 2020-01-01\n");
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigMissing { key, .. } if key == "end_date"));
    }

    #[test]
    fn invalid_start_date_format_fails() {
        let config = make_config("[backtest]\nstart_date = 2020/01/01\nend_date = 2024-12-31\n");
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn start_date_after_end_date_fails() {
        let config = make_config("[backtest]\nstart_date = 2024-12-31\nend_date = 2020-01-01\n");
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn risk_free_rate_out_of_range_fails() {
        let config = make_config(&format!("{DATES}risk_free_rate = 1.5\n"));
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "risk_free_rate"));
    }

    #[test]
    fn unknown_error_policy_fails() {
        let config = make_config(&format!("{DATES}error_policy = lenient\n"));
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "error_policy"));
    }

    #[test]
    fn garbage_boolean_fails() {
        let config = make_config(&format!("{DATES}renormalize_composite = maybe\n"));
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(
            matches!(err, VintageError::ConfigInvalid { key, .. } if key == "renormalize_composite")
        );
    }

    #[test]
    fn unparsable_number_is_not_defaulted() {
        let config = make_config("[strategy]\nholding_months = six\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "holding_months"));
    }

    #[test]
    fn zero_holding_months_fails() {
        let config = make_config("[strategy]\nholding_months = 0\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "holding_months"));
    }

    #[test]
    fn zero_lookback_fails() {
        let config = make_config("[strategy]\nlookback_months = 0\nmin_history_months = 0\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "lookback_months"));
    }

    #[test]
    fn negative_skip_fails() {
        let config = make_config("[strategy]\nskip_months = -1\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "skip_months"));
    }

    #[test]
    fn selection_fraction_bounds() {
        for bad in ["0", "0.51", "-0.1"] {
            let config = make_config(&format!("[strategy]\nselection_fraction = {bad}\n"));
            let err = validate_strategy_config(&config).unwrap_err();
            assert!(
                matches!(err, VintageError::ConfigInvalid { ref key, .. } if key == "selection_fraction"),
                "{bad}"
            );
        }
        assert!(validate_strategy_config(&make_config("[strategy]\nselection_fraction = 0.5\n")).is_ok());
    }

    #[test]
    fn negative_exposure_fails() {
        let config = make_config("[strategy]\nshort_exposure = -0.5\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "short_exposure"));
    }

    #[test]
    fn min_history_shorter_than_lookback_fails() {
        let config = make_config("[strategy]\nlookback_months = 12\nmin_history_months = 6\n");
        let err = validate_strategy_config(&config).unwrap_err();
        assert!(
            matches!(err, VintageError::ConfigInvalid { key, .. } if key == "min_history_months")
        );
    }

    #[test]
    fn missing_universe_id_fails() {
        let err = validate_universe_config(&make_config("[universe]\n")).unwrap_err();
        assert!(matches!(err, VintageError::ConfigMissing { key, .. } if key == "id"));
    }

    #[test]
    fn bad_covered_through_fails() {
        let config = make_config("[universe]\nid = SP500\ncovered_through = soon\n");
        let err = validate_universe_config(&config).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "covered_through"));
    }

    #[test]
    fn csv_source_requires_dir() {
        let err = validate_data_config(&make_config("[data]\nsource = csv\n")).unwrap_err();
        assert!(matches!(err, VintageError::ConfigMissing { key, .. } if key == "csv_dir"));
    }

    #[test]
    fn sqlite_source_requires_path() {
        let err = validate_data_config(&make_config("[data]\nsource = sqlite\n")).unwrap_err();
        assert!(matches!(err, VintageError::ConfigMissing { key, .. } if key == "path"));

        let ok = make_config("[data]\nsource = sqlite\n[sqlite]\npath = prices.db\npool_size = 2\n");
        assert!(validate_data_config(&ok).is_ok());
    }

    #[test]
    fn unknown_source_fails() {
        let err = validate_data_config(&make_config("[data]\nsource = postgres\n")).unwrap_err();
        assert!(matches!(err, VintageError::ConfigInvalid { key, .. } if key == "source"));
    }
}
