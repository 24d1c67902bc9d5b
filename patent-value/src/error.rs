//! Error types for the valuation pipeline.
//!
//! Only failures that stop a run are errors. Rows whose value is numerically
//! undefined (zero volatility, returns at or below -100%) are carried as NaN
//! and counted in the stage diagnostics instead.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ValuationError>;

/// Failure of a pipeline stage.
#[derive(Error, Debug)]
pub enum ValuationError {
    /// Required input columns are absent
    #[error("Missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A cell could not be interpreted
    #[error("Invalid value {value:?} in column {column} on line {line}: {reason}")]
    InvalidRecord {
        line: u64,
        column: String,
        value: String,
        reason: String,
    },

    /// The signal-to-noise parameter is unusable
    #[error("Invalid gamma {0}: must be finite and greater than 0")]
    InvalidGamma(f64),

    /// CSV reader/writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ValuationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input table is not usable as given
    MalformedInput,
    /// A model parameter is out of range
    InvalidParameter,
    /// Reading or writing failed
    Io,
    /// A bug or an unexpected library failure
    Internal,
}

impl ValuationError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingColumns(_) | Self::InvalidRecord { .. } => ErrorKind::MalformedInput,
            Self::InvalidGamma(_) => ErrorKind::InvalidParameter,
            Self::Csv(e) if e.is_io_error() => ErrorKind::Io,
            Self::Csv(_) => ErrorKind::MalformedInput,
            Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error was caused by the input data.
    pub fn is_malformed_input(&self) -> bool {
        self.kind() == ErrorKind::MalformedInput
    }
}

impl From<ValuationError> for patent_common::Error {
    fn from(err: ValuationError) -> Self {
        match err.kind() {
            ErrorKind::MalformedInput => Self::InvalidInput(err.to_string()),
            ErrorKind::InvalidParameter => Self::Config(err.to_string()),
            ErrorKind::Internal => Self::Internal(err.to_string()),
            ErrorKind::Io => match err {
                ValuationError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Self::NotFound(e.to_string())
                }
                ValuationError::Io(e) => Self::Io(e),
                other => Self::Io(std::io::Error::other(other.to_string())),
            },
        }
    }
}
