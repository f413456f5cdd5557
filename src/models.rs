//! Data model shared by the scorer, the calibrator and the gate.

use crate::error::{CalibrationError, ConfigError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Severity reported by the static analyzer for one finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Parse an analyzer severity label. Unknown labels are treated as LOW.
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Contribution of a finding of this severity to the snippet score.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 0.1,
            Severity::Medium => 0.5,
            Severity::High => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single finding from the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIssue {
    /// Analyzer rule identifier (e.g. B301)
    pub rule_id: String,
    pub severity: Severity,
    pub confidence: String,
    pub description: String,
    pub line: Option<u32>,
}

/// Outcome of one scoring call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringResult {
    pub score: f64,
    /// Findings in analyzer order, kept for diagnostics
    pub issues: Vec<SecurityIssue>,
    /// Set when the score is a fail-closed substitute
    pub error: Option<String>,
}

impl ScoringResult {
    pub fn clean() -> Self {
        Self {
            score: 0.0,
            issues: Vec::new(),
            error: None,
        }
    }

    /// Conservative result used when the snippet could not be analyzed.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            score: 1.0,
            issues: Vec::new(),
            error: Some(reason.into()),
        }
    }

    /// Score a list of findings: the maximum severity weight wins and the
    /// first HIGH finding ends the scan.
    pub fn from_issues(issues: Vec<SecurityIssue>) -> Self {
        let mut score: f64 = 0.0;
        for (idx, issue) in issues.iter().enumerate() {
            if issue.severity == Severity::High {
                let mut kept = issues;
                kept.truncate(idx + 1);
                return Self {
                    score: 1.0,
                    issues: kept,
                    error: None,
                };
            }
            score = score.max(issue.severity.weight());
        }
        Self {
            score,
            issues,
            error: None,
        }
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

fn unknown() -> String {
    "unknown".to_string()
}

fn default_scorer_name() -> String {
    "bandit".to_string()
}

fn default_scorer_version() -> String {
    "1.7+".to_string()
}

/// Accepts RFC 3339 timestamps as well as offset-less ISO timestamps written
/// by older calibration tooling (interpreted as UTC).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(serde::de::Error::custom(format!(
        "unrecognized timestamp '{}'",
        raw
    )))
}

/// The persisted outcome of one calibration run.
///
/// Superseded by later runs, never mutated in place. The gate only ever reads
/// `q_hat` from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationData {
    #[serde(alias = "q_hat")]
    pub q_hat: f64,
    pub alpha: f64,
    #[serde(alias = "n_samples")]
    pub n_samples: usize,
    pub scores: Vec<f64>,
    #[serde(alias = "dataset", default = "unknown")]
    pub dataset_name: String,
    #[serde(alias = "dataset_hash", default)]
    pub dataset_hash: String,
    #[serde(alias = "scorer", default = "default_scorer_name")]
    pub scorer_name: String,
    #[serde(alias = "scorer_version", default = "default_scorer_version")]
    pub scorer_version: String,
    #[serde(alias = "calibrated_at", deserialize_with = "deserialize_timestamp")]
    pub calibrated_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
}

impl CalibrationData {
    /// Check the record invariants: ranges of `q_hat`, `alpha` and every
    /// score, and `n_samples == scores.len()`.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !(0.0..=1.0).contains(&self.q_hat) {
            return Err(CalibrationError::InvalidRecord(format!(
                "qHat {} is outside [0.0, 1.0]",
                self.q_hat
            )));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(CalibrationError::InvalidAlpha(self.alpha));
        }
        if self.n_samples == 0 {
            return Err(CalibrationError::InvalidRecord(
                "nSamples must be positive".to_string(),
            ));
        }
        if self.n_samples != self.scores.len() {
            return Err(CalibrationError::InvalidRecord(format!(
                "nSamples is {} but {} scores were recorded",
                self.n_samples,
                self.scores.len()
            )));
        }
        if let Some((index, value)) = self
            .scores
            .iter()
            .enumerate()
            .find(|(_, s)| !(0.0..=1.0).contains(*s))
        {
            return Err(CalibrationError::InvalidScore {
                index,
                value: *value,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationStatus {
    Pass,
    Reject,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pass => "PASS",
            VerificationStatus::Reject => "REJECT",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const PASS_REASON: &str = "Code meets assurance standards.";

/// Decision returned by the gate for one snippet.
///
/// Only constructible through [`VerificationResult::decide`], so the status
/// always agrees with `score <= threshold`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    status: VerificationStatus,
    score: f64,
    threshold: f64,
    reason: String,
    latency_ms: Option<f64>,
}

impl VerificationResult {
    /// Apply the inclusive decision rule. `detail` is appended to a rejection
    /// reason (used for scoring failures).
    pub fn decide(
        score: f64,
        threshold: f64,
        latency_ms: Option<f64>,
        detail: Option<&str>,
    ) -> Self {
        let passed = score <= threshold;
        let reason = if passed {
            PASS_REASON.to_string()
        } else {
            let mut reason = format!(
                "Security score {:.4} exceeds threshold {:.4}.",
                score, threshold
            );
            if let Some(detail) = detail {
                reason.push_str(&format!(" ({})", detail));
            }
            reason
        };
        Self {
            status: if passed {
                VerificationStatus::Pass
            } else {
                VerificationStatus::Reject
            },
            score,
            threshold,
            reason,
            latency_ms,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == VerificationStatus::Pass
    }

    pub fn status(&self) -> VerificationStatus {
        self.status
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }
}

/// Gate configuration supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    default_threshold: f64,
    pub calibration_path: PathBuf,
}

impl GateConfig {
    pub fn new(default_threshold: f64, calibration_path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        validate_threshold(default_threshold)?;
        Ok(Self {
            default_threshold,
            calibration_path: calibration_path.into(),
        })
    }

    pub fn default_threshold(&self) -> f64 {
        self.default_threshold
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.15,
            calibration_path: PathBuf::from("calibration_data.json"),
        }
    }
}

pub(crate) fn validate_threshold(value: f64) -> Result<f64, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidThreshold(value))
    }
}
