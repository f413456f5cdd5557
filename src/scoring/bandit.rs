use super::process::run_with_timeout;
use super::sandbox::ExecutionSandbox;
use super::sanitize::{CodeSanitizer, MarkdownSanitizer};
use super::{ScoringConfig, ScoringService};
use crate::error::ScoringError;
use crate::models::{ScoringResult, SecurityIssue, Severity};
use crate::util::truncate;
use serde::Deserialize;
use std::io::ErrorKind;
use std::process::Command;
use tracing::{debug, error, instrument, warn};

const ANALYZER_VERSION: &str = "1.7+";
const RAW_OUTPUT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct BanditReport {
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    results: Vec<BanditFinding>,
}

#[derive(Debug, Deserialize)]
struct BanditFinding {
    #[serde(default = "unknown_rule")]
    test_id: String,
    #[serde(default)]
    issue_severity: Option<String>,
    #[serde(default)]
    issue_confidence: Option<String>,
    #[serde(default)]
    issue_text: String,
    #[serde(default)]
    line_number: Option<u32>,
}

fn unknown_rule() -> String {
    "UNKNOWN".to_string()
}

impl From<BanditFinding> for SecurityIssue {
    fn from(finding: BanditFinding) -> Self {
        SecurityIssue {
            rule_id: finding.test_id,
            severity: finding
                .issue_severity
                .as_deref()
                .map(Severity::parse_lenient)
                .unwrap_or(Severity::Low),
            confidence: finding
                .issue_confidence
                .unwrap_or_else(|| "MEDIUM".to_string()),
            description: finding.issue_text,
            line: finding.line_number,
        }
    }
}

/// Scores Python code with the Bandit SAST tool.
///
/// | outcome                         | score |
/// |---------------------------------|-------|
/// | no findings                     | 0.0   |
/// | worst finding LOW / MEDIUM      | 0.1 / 0.5 |
/// | any HIGH finding                | 1.0   |
/// | analyzer reported a parse error | 1.0   |
/// | missing, timeout, bad output    | 1.0 (fail-closed) or `Err` (fail-open) |
pub struct BanditScorer {
    config: ScoringConfig,
    sanitizer: Box<dyn CodeSanitizer>,
    sandbox: ExecutionSandbox,
}

impl BanditScorer {
    pub fn new(config: ScoringConfig) -> Self {
        let sandbox = ExecutionSandbox::new(config.temp_dir.clone());
        Self {
            config,
            sanitizer: Box::new(MarkdownSanitizer),
            sandbox,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: impl CodeSanitizer + 'static) -> Self {
        self.sanitizer = Box::new(sanitizer);
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    fn run_analyzer(&self, code: &str) -> Result<ScoringResult, ScoringError> {
        let staged = self.sandbox.stage(code).map_err(ScoringError::Staging)?;

        let mut command = Command::new(&self.config.analyzer);
        command
            .args(&self.config.analyzer_args)
            .args(["-f", "json", "-q", "--exit-zero"])
            .arg(staged.path());

        let output = match run_with_timeout(&mut command, self.config.timeout) {
            Ok(output) => output,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ScoringError::BackendMissing(self.config.analyzer.clone()))
            }
            Err(err) => return Err(ScoringError::Execution(err.to_string())),
        };
        drop(staged);

        if output.timed_out {
            return Err(ScoringError::Timeout(self.config.timeout));
        }
        debug!(
            elapsed_ms = output.elapsed.as_millis() as u64,
            exit_code = ?output.status.and_then(|s| s.code()),
            "Analyzer finished"
        );

        parse_report(&output.stdout, &output.stderr)
    }
}

impl ScoringService for BanditScorer {
    fn name(&self) -> &str {
        &self.config.analyzer
    }

    fn version(&self) -> &str {
        ANALYZER_VERSION
    }

    #[instrument(skip_all, fields(analyzer = %self.config.analyzer, bytes = code.len()))]
    fn analyze(&self, code: &str) -> Result<ScoringResult, ScoringError> {
        let sanitized = self.sanitizer.sanitize(code);
        match self.run_analyzer(&sanitized) {
            Ok(result) => Ok(result),
            Err(err) if self.config.fail_closed => {
                error!(error = %err, "Scoring failed, failing closed");
                Ok(ScoringResult::failed(err.to_string()))
            }
            Err(err) => {
                error!(error = %err, "Scoring failed");
                Err(err)
            }
        }
    }

    #[instrument(skip_all, fields(analyzer = %self.config.analyzer, bytes = code.len()))]
    fn analyze_strict(&self, code: &str) -> Result<ScoringResult, ScoringError> {
        let sanitized = self.sanitizer.sanitize(code);
        self.run_analyzer(&sanitized).map_err(|err| {
            error!(error = %err, "Scoring failed");
            err
        })
    }
}

/// Interpret Bandit's JSON report.
pub(crate) fn parse_report(stdout: &str, stderr: &str) -> Result<ScoringResult, ScoringError> {
    let report: BanditReport = serde_json::from_str(stdout).map_err(|err| {
        let stderr = stderr.trim();
        let context = if stderr.is_empty() {
            truncate(stdout.trim(), RAW_OUTPUT_PREVIEW_CHARS)
        } else {
            truncate(stderr, RAW_OUTPUT_PREVIEW_CHARS)
        };
        ScoringError::MalformedOutput(format!("{} [{}]", err, context))
    })?;

    // Un-analyzable code cannot be shown to be safe
    if let Some(first) = report.errors.first() {
        let reason = first
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or("unknown");
        warn!(errors = report.errors.len(), reason, "Analyzer could not parse the code");
        return Ok(ScoringResult::failed(format!("Code parse error: {}", reason)));
    }

    let issues: Vec<SecurityIssue> = report.results.into_iter().map(SecurityIssue::from).collect();
    for issue in &issues {
        warn!(rule = %issue.rule_id, severity = %issue.severity, line = ?issue.line, "Finding");
    }
    Ok(ScoringResult::from_issues(issues))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn finding(test_id: &str, severity: &str) -> String {
        format!(
            r#"{{"test_id": "{}", "issue_severity": "{}", "issue_confidence": "HIGH", "issue_text": "t", "line_number": 1}}"#,
            test_id, severity
        )
    }

    #[test]
    fn test_parse_no_results_scores_zero() {
        let result = parse_report(r#"{"errors": [], "results": []}"#, "").unwrap();
        assert_eq!(result.score, 0.0);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_parse_low_and_high_scores_one() {
        let stdout = format!(
            r#"{{"errors": [], "results": [{}, {}]}}"#,
            finding("B311", "LOW"),
            finding("B307", "HIGH")
        );
        let result = parse_report(&stdout, "").unwrap();
        assert_eq!(result.score, 1.0);
        assert_eq!(result.issues[0].rule_id, "B311");
    }

    #[test]
    fn test_parse_medium_only() {
        let stdout = format!(r#"{{"results": [{}]}}"#, finding("B301", "MEDIUM"));
        let result = parse_report(&stdout, "").unwrap();
        assert_eq!(result.score, 0.5);
        assert_eq!(result.issues[0].severity, Severity::Medium);
    }

    #[test]
    fn test_parse_unknown_severity_counts_as_low() {
        let stdout = format!(r#"{{"results": [{}]}}"#, finding("B999", "UNDEFINED"));
        assert_eq!(parse_report(&stdout, "").unwrap().score, 0.1);
    }

    #[test]
    fn test_parse_analyzer_error_scores_one() {
        let stdout = r#"{"errors": [{"filename": "x.py", "reason": "syntax error while parsing AST from file"}], "results": []}"#;
        let result = parse_report(stdout, "").unwrap();
        assert_eq!(result.score, 1.0);
        assert!(result.error.unwrap().contains("syntax error"));
    }

    #[test]
    fn test_parse_malformed_output() {
        let err = parse_report("not json at all", "Traceback ...").unwrap_err();
        match err {
            ScoringError::MalformedOutput(msg) => assert!(msg.contains("Traceback")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_missing_results_is_malformed() {
        assert!(matches!(
            parse_report(r#"{"errors": []}"#, ""),
            Err(ScoringError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_missing_backend_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let scorer = BanditScorer::new(ScoringConfig {
            analyzer: "definitely-not-a-real-analyzer-binary".into(),
            temp_dir: Some(dir.path().to_path_buf()),
            ..ScoringConfig::default()
        });
        let result = scorer.analyze("print('hi')").unwrap();
        assert_eq!(result.score, 1.0);
        assert!(result.error.unwrap().contains("not found"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_backend_fail_open_returns_error() {
        let scorer = BanditScorer::new(ScoringConfig {
            analyzer: "definitely-not-a-real-analyzer-binary".into(),
            fail_closed: false,
            timeout: Duration::from_secs(1),
            ..ScoringConfig::default()
        });
        assert!(matches!(
            scorer.score("print('hi')"),
            Err(ScoringError::BackendMissing(_))
        ));
    }
}
