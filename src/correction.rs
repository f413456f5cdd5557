//! Generate, verify, retry.
//!
//! Drives a [`CodeGenerator`] until the gate accepts its output or the
//! attempt budget runs out. After each rejection the prompt is extended with
//! a warning before the next attempt. Generation itself is external: the
//! shipped [`CommandGenerator`] runs any program that prints code to stdout.

use crate::gate::Commander;
use crate::models::VerificationResult;
use crate::scoring::process::run_with_timeout;
use anyhow::{anyhow, bail, Context, Result};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

pub const RETRY_NOTICE: &str = "IMPORTANT: Avoid security issues. Previous attempt was rejected.";
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(120);

pub trait CodeGenerator {
    fn generate(&mut self, prompt: &str) -> Result<String>;
}

/// Runs `program args... <prompt>` and takes the generated code from stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_GENERATOR_TIMEOUT,
        }
    }

    /// Split a shell-style command line on whitespace.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("Generator command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CodeGenerator for CommandGenerator {
    fn generate(&mut self, prompt: &str) -> Result<String> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(prompt);

        let output = run_with_timeout(&mut command, self.timeout)
            .with_context(|| format!("Failed to run generator '{}'", self.program))?;
        if output.timed_out {
            bail!(
                "Generator '{}' timed out after {}s",
                self.program,
                self.timeout.as_secs()
            );
        }
        let success = output.status.map(|s| s.success()).unwrap_or(false);
        if !success {
            bail!(
                "Generator '{}' failed: {}",
                self.program,
                output.stderr.trim()
            );
        }

        let code = output.stdout.trim();
        if code.is_empty() {
            bail!("Generator '{}' produced no output", self.program);
        }
        Ok(code.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CorrectionAttempt {
    /// 1-based
    pub attempt: u32,
    pub code: String,
    pub result: VerificationResult,
}

#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    pub attempts: Vec<CorrectionAttempt>,
    /// The code that passed, if any attempt did
    pub accepted: Option<String>,
}

impl CorrectionOutcome {
    pub fn succeeded(&self) -> bool {
        self.accepted.is_some()
    }
}

pub fn revise_prompt(prompt: &str) -> String {
    format!("{}\n\n{}", prompt, RETRY_NOTICE)
}

/// Run up to `max_attempts` rounds. `observer` sees each attempt as it is
/// decided. A generator failure ends the loop with an error.
pub fn run_correction_loop<G, F>(
    generator: &mut G,
    gate: &Commander,
    prompt: &str,
    max_attempts: u32,
    mut observer: F,
) -> Result<CorrectionOutcome>
where
    G: CodeGenerator + ?Sized,
    F: FnMut(&CorrectionAttempt),
{
    let mut prompt = prompt.to_string();
    let mut attempts = Vec::new();

    for attempt in 1..=max_attempts.max(1) {
        let code = generator
            .generate(&prompt)
            .with_context(|| format!("Generation failed on attempt {}", attempt))?;
        let result = gate.verify(&code);
        info!(
            attempt,
            status = %result.status(),
            score = result.score(),
            "Correction attempt decided"
        );

        let record = CorrectionAttempt {
            attempt,
            code,
            result,
        };
        observer(&record);
        let passed = record.result.passed();
        let code = record.code.clone();
        attempts.push(record);

        if passed {
            return Ok(CorrectionOutcome {
                attempts,
                accepted: Some(code),
            });
        }
        prompt = revise_prompt(&prompt);
    }

    warn!(max_attempts, "Correction loop exhausted its attempts");
    Ok(CorrectionOutcome {
        attempts,
        accepted: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::store::MemoryCalibrationStore;
    use crate::error::ScoringError;
    use crate::models::{GateConfig, ScoringResult};
    use crate::scoring::ScoringService;
    use std::sync::Arc;

    struct EvalScorer;

    impl ScoringService for EvalScorer {
        fn name(&self) -> &str {
            "eval"
        }

        fn version(&self) -> &str {
            "test"
        }

        fn analyze(&self, code: &str) -> Result<ScoringResult, ScoringError> {
            Ok(ScoringResult {
                score: if code.contains("eval(") { 1.0 } else { 0.0 },
                issues: Vec::new(),
                error: None,
            })
        }
    }

    /// Hands out canned responses and remembers the prompts it saw.
    struct ScriptedGenerator {
        responses: Vec<&'static str>,
        prompts: Vec<String>,
    }

    impl CodeGenerator for ScriptedGenerator {
        fn generate(&mut self, prompt: &str) -> Result<String> {
            self.prompts.push(prompt.to_string());
            if self.responses.is_empty() {
                bail!("out of responses");
            }
            Ok(self.responses.remove(0).to_string())
        }
    }

    fn gate() -> Commander {
        Commander::new(
            Arc::new(EvalScorer),
            Arc::new(MemoryCalibrationStore::new()),
            GateConfig::default(),
        )
    }

    #[test]
    fn test_accepts_after_retry_with_revised_prompt() {
        let mut generator = ScriptedGenerator {
            responses: vec!["eval(x)", "def f(x):\n    return x"],
            prompts: Vec::new(),
        };
        let mut seen = 0;
        let outcome =
            run_correction_loop(&mut generator, &gate(), "write f", 3, |_| seen += 1).unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(seen, 2);
        assert_eq!(generator.prompts[0], "write f");
        assert_eq!(generator.prompts[1], format!("write f\n\n{}", RETRY_NOTICE));
    }

    #[test]
    fn test_exhausts_attempts() {
        let mut generator = ScriptedGenerator {
            responses: vec!["eval(a)", "eval(b)", "eval(c)", "ok = 1"],
            prompts: Vec::new(),
        };
        let outcome = run_correction_loop(&mut generator, &gate(), "p", 3, |_| {}).unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts.len(), 3);
        assert!(outcome.attempts.iter().all(|a| !a.result.passed()));
    }

    #[test]
    fn test_generator_error_stops_loop() {
        let mut generator = ScriptedGenerator {
            responses: vec!["eval(a)"],
            prompts: Vec::new(),
        };
        let err = run_correction_loop(&mut generator, &gate(), "p", 3, |_| {}).unwrap_err();
        assert!(err.to_string().contains("attempt 2"));
    }

    #[test]
    fn test_command_line_parsing() {
        assert!(CommandGenerator::from_command_line("   ").is_err());
        let generator = CommandGenerator::from_command_line("llm --model small").unwrap();
        assert_eq!(generator.program, "llm");
        assert_eq!(generator.args, vec!["--model", "small"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_generator_reads_stdout() {
        let mut generator = CommandGenerator::new(
            "sh",
            vec!["-c".into(), "printf 'print(%s)\\n' \"$0\"".into()],
        );
        assert_eq!(generator.generate("hello").unwrap(), "print(hello)");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_generator_failure_surfaces_stderr() {
        let mut generator =
            CommandGenerator::new("sh", vec!["-c".into(), "echo quota >&2; exit 3".into()]);
        let err = generator.generate("p").unwrap_err();
        assert!(err.to_string().contains("quota"));
    }
}
