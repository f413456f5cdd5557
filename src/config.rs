//! Configuration management for the sentinel
//!
//! Settings are read from TOML, first match wins:
//! 1. an explicit path (`--config`)
//! 2. `./sentinel.toml`
//! 3. `<config dir>/assured-sentinel/config.toml`
//!
//! then `SENTINEL_*` environment variables are applied on top and the result
//! is validated. With no file at all the defaults are used.

use crate::calibration::runner::CalibrationConfig;
use crate::calibration::validate_alpha;
use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use crate::models::{validate_threshold, GateConfig};
use crate::scoring::{ScoringConfig, DEFAULT_ANALYZER};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const LOCAL_CONFIG_FILE: &str = "sentinel.toml";
const CONFIG_DIR_NAME: &str = "assured-sentinel";
const ENV_PREFIX: &str = "SENTINEL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub default_threshold: f64,
    pub calibration_path: PathBuf,
}

impl Default for GateSettings {
    fn default() -> Self {
        let gate = GateConfig::default();
        Self {
            default_threshold: gate.default_threshold(),
            calibration_path: gate.calibration_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub alpha: f64,
    pub n_samples: usize,
    /// Fraction of samples replaced by synthetic vulnerabilities
    pub injection_rate: f64,
    /// Worker threads for calibration and scan scoring
    pub workers: usize,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            n_samples: 100,
            injection_rate: 0.2,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub analyzer: String,
    pub analyzer_args: Vec<String>,
    pub timeout_secs: u64,
    pub fail_closed: bool,
    pub temp_dir: Option<PathBuf>,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            analyzer: DEFAULT_ANALYZER.to_string(),
            analyzer_args: Vec::new(),
            timeout_secs: 30,
            fail_closed: true,
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionSettings {
    /// Generation attempts before the correction loop gives up
    pub max_retries: u32,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gate: GateSettings,
    pub calibration: CalibrationSettings,
    pub scoring: ScoringSettings,
    pub logging: LoggingConfig,
    pub correction: CorrectionSettings,
}

impl Settings {
    /// Per-user config file location.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR_NAME).join("config.toml"))
    }

    /// Resolve, read, override from the environment and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match resolve_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        info!(path = %path.display(), "Loaded config");
        Ok(settings)
    }

    /// Apply `SENTINEL_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        };

        if let Some((key, v)) = var("ALPHA") {
            self.calibration.alpha = parse_var(&key, &v)?;
        }
        if let Some((key, v)) = var("DEFAULT_THRESHOLD") {
            self.gate.default_threshold = parse_var(&key, &v)?;
        }
        if let Some((_, v)) = var("CALIBRATION_PATH") {
            self.gate.calibration_path = PathBuf::from(v);
        }
        if let Some((key, v)) = var("CALIBRATION_N_SAMPLES") {
            self.calibration.n_samples = parse_var(&key, &v)?;
        }
        if let Some((key, v)) = var("INJECTION_RATE") {
            self.calibration.injection_rate = parse_var(&key, &v)?;
        }
        if let Some((key, v)) = var("WORKERS") {
            self.calibration.workers = parse_var(&key, &v)?;
        }
        if let Some((key, v)) = var("SCORING_TIMEOUT") {
            self.scoring.timeout_secs = parse_var(&key, &v)?;
        }
        if let Some((key, v)) = var("SCORING_FAIL_CLOSED") {
            self.scoring.fail_closed = parse_bool(&key, &v)?;
        }
        if let Some((_, v)) = var("ANALYZER") {
            self.scoring.analyzer = v;
        }
        if let Some((_, v)) = var("TEMP_DIR") {
            self.scoring.temp_dir = Some(PathBuf::from(v));
        }
        if let Some((_, v)) = var("LOG_LEVEL") {
            self.logging.level = v.to_ascii_lowercase();
        }
        if let Some((key, v)) = var("MAX_RETRIES") {
            self.correction.max_retries = parse_var(&key, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_threshold(self.gate.default_threshold)?;
        validate_alpha(self.calibration.alpha).map_err(|_| {
            ConfigError::invalid(
                "calibration.alpha",
                self.calibration.alpha,
                "must be strictly between 0.0 and 1.0",
            )
        })?;
        if self.calibration.n_samples < 2 {
            return Err(ConfigError::invalid(
                "calibration.n_samples",
                self.calibration.n_samples,
                "at least 2 samples are required",
            ));
        }
        if !(0.0..=1.0).contains(&self.calibration.injection_rate) {
            return Err(ConfigError::invalid(
                "calibration.injection_rate",
                self.calibration.injection_rate,
                "must be between 0.0 and 1.0",
            ));
        }
        if self.calibration.workers == 0 {
            return Err(ConfigError::invalid(
                "calibration.workers",
                self.calibration.workers,
                "must be at least 1",
            ));
        }
        if self.scoring.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "scoring.timeout_secs",
                self.scoring.timeout_secs,
                "must be at least 1 second",
            ));
        }
        if self.scoring.analyzer.trim().is_empty() {
            return Err(ConfigError::invalid(
                "scoring.analyzer",
                &self.scoring.analyzer,
                "must not be empty",
            ));
        }
        if !LoggingConfig::is_valid_level(&self.logging.level) {
            return Err(ConfigError::invalid(
                "logging.level",
                &self.logging.level,
                "expected trace, debug, info, warn, error or off",
            ));
        }
        if self.correction.max_retries == 0 {
            return Err(ConfigError::invalid(
                "correction.max_retries",
                self.correction.max_retries,
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Override the log level from the command line. The level is checked
    /// the same way a configured one is.
    pub fn set_log_level(&mut self, level: &str) -> Result<(), ConfigError> {
        let level = level.to_ascii_lowercase();
        if !LoggingConfig::is_valid_level(&level) {
            return Err(ConfigError::invalid(
                "--log-level",
                &level,
                "expected trace, debug, info, warn, error or off",
            ));
        }
        self.logging.level = level;
        Ok(())
    }

    /// Write the settings as TOML, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid("settings", "<serialized>", e.to_string()))?;
        write_config_atomic(path, &content).map_err(write_err)?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn gate_config(&self) -> Result<GateConfig, ConfigError> {
        GateConfig::new(self.gate.default_threshold, self.gate.calibration_path.clone())
    }

    pub fn scoring_config(&self) -> ScoringConfig {
        ScoringConfig {
            analyzer: self.scoring.analyzer.clone(),
            analyzer_args: self.scoring.analyzer_args.clone(),
            timeout: Duration::from_secs(self.scoring.timeout_secs),
            fail_closed: self.scoring.fail_closed,
            temp_dir: self.scoring.temp_dir.clone(),
        }
    }

    pub fn calibration_config(&self) -> CalibrationConfig {
        CalibrationConfig {
            alpha: self.calibration.alpha,
            n_samples: self.calibration.n_samples,
            workers: self.calibration.workers,
        }
    }
}

fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    Settings::user_config_path().filter(|p| p.is_file())
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true or false")),
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("toml.tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    if let Err(err) = file.write_all(content.as_bytes()).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
