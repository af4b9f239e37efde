//! Error types for the portfolio engine.

use thiserror::Error;

/// Main error type for the portfolio engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Optimization failure: {0}")]
    OptimizationFailure(String),

    #[error("Training failure in model '{model}': {detail}")]
    TrainingFailure { model: String, detail: String },

    #[error("Insufficient holdings: need at least {required}, got {actual}")]
    InsufficientHoldings { required: usize, actual: usize },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl EngineError {
    /// Stable machine-readable kind, surfaced alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::InsufficientData(_) => "insufficient_data",
            EngineError::OptimizationFailure(_) => "optimization_failure",
            EngineError::TrainingFailure { .. } => "training_failure",
            EngineError::InsufficientHoldings { .. } => "insufficient_holdings",
            EngineError::TaskNotFound(_) => "task_not_found",
            EngineError::DataError(_)
            | EngineError::CsvError(_)
            | EngineError::DateParseError(_) => "data_error",
            EngineError::ConfigError(_) | EngineError::TomlError(_) => "config_error",
            EngineError::IoError(_) => "io_error",
            EngineError::JsonError(_) => "serialization_error",
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
