//! Domain error types.

use chrono::NaiveDateTime;
use serde::Serialize;

/// A parse error with position information for condition parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for fxsim.
#[derive(Debug, thiserror::Error)]
pub enum FxsimError {
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

    #[error("invalid backtest configuration: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    RuleParse(#[from] ParseError),

    #[error("invalid bar at index {index} ({timestamp}): {reason}")]
    Data {
        index: usize,
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("{path}, record {record}: {reason}")]
    DataFormat {
        path: String,
        record: usize,
        reason: String,
    },

    #[error("custom strategy failed at bar {index} ({timestamp}): {cause}")]
    Evaluation {
        index: usize,
        timestamp: NaiveDateTime,
        cause: String,
    },

    #[error("backtest cancelled")]
    Cancelled,

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error("insufficient data for {symbol}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FxsimError {
    pub fn config(reason: impl Into<String>) -> Self {
        FxsimError::Config {
            reason: reason.into(),
        }
    }

    /// Process exit status for this error category.
    pub fn exit_status(&self) -> u8 {
        match self {
            FxsimError::Io(_) | FxsimError::Csv(_) | FxsimError::Json(_) => 1,
            FxsimError::ConfigParse { .. }
            | FxsimError::ConfigMissing { .. }
            | FxsimError::ConfigInvalid { .. }
            | FxsimError::Config { .. } => 2,
            FxsimError::Data { .. } | FxsimError::DataFormat { .. } => 3,
            FxsimError::RuleParse(_) => 4,
            FxsimError::NoData { .. } | FxsimError::InsufficientData { .. } => 5,
            FxsimError::Evaluation { .. } => 6,
            FxsimError::Cancelled => 130,
        }
    }
}

impl From<&FxsimError> for std::process::ExitCode {
    fn from(err: &FxsimError) -> Self {
        std::process::ExitCode::from(err.exit_status())
    }
}

/// Non-fatal, per-signal failures. The affected entry is skipped and the run continues.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputationError {
    #[error("risk sizing requires a stop distance, got zero")]
    ZeroStopDistance,

    #[error("computed size {size} lots is below the lot step {lot_step}")]
    SizeBelowLotStep { size: f64, lot_step: f64 },

    #[error("equity {equity} is not positive")]
    NonPositiveEquity { equity: f64 },

    #[error("{indicator} has no value at the signal bar")]
    IndicatorUnavailable { indicator: String },

    #[error("entry signal on the final bar has no next bar to fill on")]
    NoFillBar,
}

/// A non-fatal issue attached to the bar where it occurred.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunIssue {
    pub index: usize,
    pub timestamp: NaiveDateTime,
    pub error: ComputationError,
}
