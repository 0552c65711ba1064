//! Domain error types.

use chrono::NaiveDate;

/// Top-level error type for vintage.
#[derive(Debug, thiserror::Error)]
pub enum VintageError {
    #[error("data source error: {reason}")]
    Data { reason: String },

    #[error("data source query error: {reason}")]
    DataQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("insufficient data for {subject} on {date}: {reason}")]
    InsufficientData {
        subject: String,
        date: NaiveDate,
        reason: String,
    },

    #[error("universe {index_id} has no eligible symbols on {date}")]
    EmptyUniverse { index_id: String, date: NaiveDate },

    #[error("no long/short candidates on {date} ({scored} symbols scored)")]
    NoCandidates {
        date: NaiveDate,
        scored: usize,
        /// Universe members left without a finite score.
        unscored: Vec<String>,
    },

    #[error("non-finite weight for {symbol} in vintage formed {date}: {value}")]
    NonFiniteWeight {
        symbol: String,
        date: NaiveDate,
        value: f64,
    },

    #[error("price matrix has no row for {date}")]
    DateAlignment { date: NaiveDate },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VintageError {
    /// Errors that may be skipped at the per-date boundary under the
    /// `skip-and-log` policy. Everything else aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VintageError::InsufficientData { .. }
                | VintageError::EmptyUniverse { .. }
                | VintageError::NoCandidates { .. }
                | VintageError::DateAlignment { .. }
        )
    }

    /// Symbols the failure is about, for the degraded-date ledger.
    pub fn symbols(&self) -> &[String] {
        match self {
            VintageError::NoCandidates { unscored, .. } => unscored,
            _ => &[],
        }
    }

    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        VintageError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config_missing(section: &str, key: &str) -> Self {
        VintageError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<&VintageError> for std::process::ExitCode {
    fn from(err: &VintageError) -> Self {
        let code: u8 = match err {
            VintageError::Io(_) => 1,
            VintageError::ConfigParse { .. }
            | VintageError::ConfigMissing { .. }
            | VintageError::ConfigInvalid { .. } => 2,
            VintageError::Data { .. } | VintageError::DataQuery { .. } => 3,
            VintageError::InsufficientData { .. }
            | VintageError::EmptyUniverse { .. }
            | VintageError::NoCandidates { .. }
            | VintageError::DateAlignment { .. } => 5,
            VintageError::NonFiniteWeight { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
