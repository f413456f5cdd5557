//! Assured Sentinel library crate
//!
//! A conformal verification gate for machine-generated code: a static
//! analysis scorer, a split-conformal calibrator that turns a score
//! distribution into a threshold with a bounded false-accept rate, and the
//! [`Commander`] gate that applies it.
//!
//! ```no_run
//! use assured_sentinel::{Commander, Settings};
//!
//! let settings = Settings::load(None)?;
//! let gate = Commander::from_settings(&settings)?;
//! let result = gate.verify("def add(a, b):\n    return a + b");
//! println!("{} ({:.2})", result.status(), result.score());
//! # Ok::<(), assured_sentinel::error::ConfigError>(())
//! ```

pub mod calibration;
pub mod config;
pub mod correction;
pub mod error;
pub mod gate;
pub mod logging;
pub mod models;
pub mod scan;
pub mod scoring;
pub mod util;

pub use calibration::{CalibrationConfig, CalibrationRunner, ConformalCalibrator};
pub use config::Settings;
pub use gate::{Commander, GateState, ThresholdSnapshot, ThresholdSource};
pub use models::{
    CalibrationData, GateConfig, ScoringResult, SecurityIssue, Severity, VerificationResult,
    VerificationStatus,
};
pub use scoring::{BanditScorer, ScoringConfig, ScoringService};
