use chrono::NaiveDateTime;
use thiserror::Error;

use crate::population::SimulantId;

/// Result type alias using [`SqlnsError`].
pub type Result<T> = std::result::Result<T, SqlnsError>;

#[derive(Debug, Error)]
pub enum SqlnsError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The population was created on or after the program start date
    /// while the simulation was still being set up.
    #[error(
        "SQ-LNS intervention must begin strictly after the simulation start: \
         population created at {creation_time}, program starts {start_date}"
    )]
    LateStart {
        creation_time: NaiveDateTime,
        start_date: NaiveDateTime,
    },

    #[error("Unknown simulant {0}")]
    UnknownSimulant(SimulantId),

    #[error("Invalid target '{0}': expected <kind>.<name>.<measure>")]
    InvalidTarget(String),

    #[error("Invalid distribution parameters: {0}")]
    Distribution(String),

    #[error("Expected {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid run input: {0}")]
    Input(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl SqlnsError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
