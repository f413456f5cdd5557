//! Error taxonomy for the gate
//!
//! Three kinds, matching where a failure is allowed to surface:
//! - [`ScoringError`] never escapes a fail-closed scorer; it is turned into a
//!   score of 1.0. Only fail-open scorers return it.
//! - [`CalibrationError`] is fatal for a calibration run and non-fatal for the
//!   gate, which falls back to its default threshold.
//! - [`ConfigError`] is raised at the call site that supplied the bad value.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    /// The analyzer executable could not be found.
    #[error("Static analyzer '{0}' not found")]
    BackendMissing(String),

    /// The analyzer did not finish within the configured timeout.
    #[error("Static analyzer timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The analyzer ran but its output could not be interpreted.
    #[error("Static analyzer output could not be parsed: {0}")]
    MalformedOutput(String),

    /// The analyzer could not be started or waited on.
    #[error("Static analyzer execution failed: {0}")]
    Execution(String),

    /// The candidate code could not be staged for analysis.
    #[error("Failed to stage code for analysis: {0}")]
    Staging(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Insufficient samples: {available} provided, minimum {required} required")]
    InsufficientSamples { required: usize, available: usize },

    #[error("Invalid alpha {0} (must be strictly between 0.0 and 1.0)")]
    InvalidAlpha(f64),

    #[error("Score {value} at index {index} is outside [0.0, 1.0]")]
    InvalidScore { index: usize, value: f64 },

    #[error("Failed to load dataset '{dataset}': {details}")]
    DatasetLoad { dataset: String, details: String },

    #[error("Calibration file {} is corrupt: {details}", .path.display())]
    CorruptFile { path: PathBuf, details: String },

    #[error("Unsupported calibration schema version {0}")]
    UnsupportedSchema(u32),

    #[error("Invalid calibration record: {0}")]
    InvalidRecord(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scoring sample {index} failed: {source}")]
    Scoring {
        index: usize,
        #[source]
        source: ScoringError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Threshold must be between 0.0 and 1.0, got {0}")]
    InvalidThreshold(f64),

    #[error("Invalid value '{value}' for {field}: {reason}")]
    Invalid {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {details}", .path.display())]
    Parse { path: PathBuf, details: String },

    #[error("Failed to write config {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
