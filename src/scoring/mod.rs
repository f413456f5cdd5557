//! Non-conformity scoring
//!
//! A scorer maps candidate source text to a risk value in [0, 1]. The default
//! backend runs Bandit as an isolated subprocess; any analyzer that emits the
//! same JSON shape can be plugged in through [`ScoringConfig`].

mod bandit;
pub mod process;
pub mod sandbox;
pub mod sanitize;

pub use bandit::BanditScorer;
pub use sandbox::{ExecutionSandbox, StagedSource};
pub use sanitize::{CodeSanitizer, MarkdownSanitizer};

use crate::error::ScoringError;
use crate::models::ScoringResult;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ANALYZER: &str = "bandit";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub trait ScoringService: Send + Sync {
    /// Backend name recorded in calibration provenance.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Score `code` and keep the findings for diagnostics.
    ///
    /// Fail-closed scorers never return `Err`; they return a result with
    /// score 1.0 and `error` set.
    fn analyze(&self, code: &str) -> Result<ScoringResult, ScoringError>;

    /// Like [`analyze`](Self::analyze), but backend failures are always
    /// returned as `Err` regardless of the failure mode. Calibration uses this
    /// so a broken analyzer cannot be recorded as a distribution of 1.0 scores.
    fn analyze_strict(&self, code: &str) -> Result<ScoringResult, ScoringError> {
        self.analyze(code)
    }

    fn score(&self, code: &str) -> Result<f64, ScoringError> {
        self.analyze(code).map(|result| result.score)
    }
}

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Analyzer executable
    pub analyzer: String,
    /// Arguments placed before the analyzer's own flags
    pub analyzer_args: Vec<String>,
    pub timeout: Duration,
    pub fail_closed: bool,
    /// Directory for staged sources (defaults to the system temp dir)
    pub temp_dir: Option<PathBuf>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            analyzer: DEFAULT_ANALYZER.to_string(),
            analyzer_args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            fail_closed: true,
            temp_dir: None,
        }
    }
}
