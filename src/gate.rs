//! The verification gate
//!
//! [`Commander`] holds the active threshold and applies it to scored code.
//! It starts uncalibrated (the configured default threshold) and becomes
//! calibrated once a valid record is loaded from its store. A broken or
//! missing record never stops the gate from answering; it keeps the default.
//!
//! The threshold lives in an `Arc<ThresholdSnapshot>` behind a lock. Every
//! `verify` call takes one snapshot at entry, so a concurrent reload or
//! `set_threshold` can never make a single decision mix two thresholds.

use crate::calibration::store::{CalibrationStore, JsonCalibrationStore};
use crate::config::Settings;
use crate::error::{ConfigError, ScoringError};
use crate::models::{validate_threshold, CalibrationData, GateConfig, ScoringResult, VerificationResult};
use crate::scoring::{BanditScorer, ScoringService};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Where the active threshold came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ThresholdSource {
    Default,
    #[serde(rename_all = "camelCase")]
    Calibrated {
        calibrated_at: DateTime<Utc>,
        alpha: f64,
        n_samples: usize,
        dataset_name: String,
    },
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSnapshot {
    pub value: f64,
    pub source: ThresholdSource,
}

impl ThresholdSnapshot {
    fn default_for(config: &GateConfig) -> Self {
        Self {
            value: config.default_threshold(),
            source: ThresholdSource::Default,
        }
    }

    fn from_calibration(data: &CalibrationData) -> Self {
        Self {
            value: data.q_hat,
            source: ThresholdSource::Calibrated {
                calibrated_at: data.calibrated_at,
                alpha: data.alpha,
                n_samples: data.n_samples,
                dataset_name: data.dataset_name.clone(),
            },
        }
    }

    pub fn state(&self) -> GateState {
        match self.source {
            ThresholdSource::Calibrated { .. } => GateState::Calibrated,
            ThresholdSource::Default | ThresholdSource::Manual => GateState::Uncalibrated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    Uncalibrated,
    Calibrated,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateState::Uncalibrated => write!(f, "uncalibrated"),
            GateState::Calibrated => write!(f, "calibrated"),
        }
    }
}

pub struct Commander {
    scorer: Arc<dyn ScoringService>,
    store: Arc<dyn CalibrationStore>,
    config: GateConfig,
    threshold: RwLock<Arc<ThresholdSnapshot>>,
}

impl Commander {
    /// Build a gate and try to load calibration. Never fails: a missing or
    /// unreadable record leaves the gate on its default threshold.
    pub fn new(
        scorer: Arc<dyn ScoringService>,
        store: Arc<dyn CalibrationStore>,
        config: GateConfig,
    ) -> Self {
        let snapshot = load_snapshot(store.as_ref(), &config);
        Self {
            scorer,
            store,
            config,
            threshold: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Gate backed by the JSON record at `config.calibration_path`.
    pub fn with_default_store(scorer: Arc<dyn ScoringService>, config: GateConfig) -> Self {
        let store = Arc::new(JsonCalibrationStore::new(config.calibration_path.clone()));
        Self::new(scorer, store, config)
    }

    /// Bandit scorer and JSON store wired from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let config = settings.gate_config()?;
        let scorer = Arc::new(BanditScorer::new(settings.scoring_config()));
        Ok(Self::with_default_store(scorer, config))
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn scorer(&self) -> &Arc<dyn ScoringService> {
        &self.scorer
    }

    pub fn store(&self) -> &Arc<dyn CalibrationStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<ThresholdSnapshot> {
        let guard = self.threshold.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    pub fn threshold(&self) -> f64 {
        self.snapshot().value
    }

    pub fn state(&self) -> GateState {
        self.snapshot().state()
    }

    /// Override the threshold. Values outside [0, 1] are rejected, not clamped.
    pub fn set_threshold(&self, value: f64) -> Result<(), ConfigError> {
        let value = validate_threshold(value)?;
        let previous = self.replace(ThresholdSnapshot {
            value,
            source: ThresholdSource::Manual,
        });
        info!(previous = previous.value, threshold = value, "Threshold set manually");
        Ok(())
    }

    /// Re-read the store and swap in whatever it yields.
    pub fn reload_calibration(&self) -> GateState {
        let snapshot = load_snapshot(self.store.as_ref(), &self.config);
        let state = snapshot.state();
        self.replace(snapshot);
        state
    }

    fn replace(&self, snapshot: ThresholdSnapshot) -> Arc<ThresholdSnapshot> {
        let mut guard = self.threshold.write().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *guard, Arc::new(snapshot))
    }

    /// Score `code` and decide. Scoring failures of any kind become a
    /// rejection with score 1.0.
    #[instrument(skip_all, fields(bytes = code.len()))]
    pub fn verify(&self, code: &str) -> VerificationResult {
        let snapshot = self.snapshot();
        let start = Instant::now();
        let outcome = self.scorer.analyze(code);
        let latency_ms = elapsed_ms(start);

        let scored = match outcome {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "Scoring failed, rejecting");
                ScoringResult::failed(err.to_string())
            }
        };
        decide(&snapshot, scored, latency_ms)
    }

    /// Like [`verify`](Self::verify), but a scorer error is returned instead
    /// of being turned into a rejection.
    pub fn try_verify(&self, code: &str) -> Result<VerificationResult, ScoringError> {
        let snapshot = self.snapshot();
        let start = Instant::now();
        let scored = self.scorer.analyze(code)?;
        Ok(decide(&snapshot, scored, elapsed_ms(start)))
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn decide(snapshot: &ThresholdSnapshot, scored: ScoringResult, latency_ms: f64) -> VerificationResult {
    let (score, detail) = if (0.0..=1.0).contains(&scored.score) {
        (scored.score, scored.error)
    } else {
        warn!(score = scored.score, "Scorer returned an out-of-range score");
        (1.0, Some(format!("Invalid score {}", scored.score)))
    };

    let result =
        VerificationResult::decide(score, snapshot.value, Some(latency_ms), detail.as_deref());
    info!(
        status = %result.status(),
        score,
        threshold = snapshot.value,
        latency_ms,
        issues = scored.issues.len(),
        "Verification complete"
    );
    result
}

fn load_snapshot(store: &dyn CalibrationStore, config: &GateConfig) -> ThresholdSnapshot {
    match store.load() {
        Ok(Some(data)) => {
            info!(
                q_hat = data.q_hat,
                alpha = data.alpha,
                n_samples = data.n_samples,
                location = %store.location(),
                "Loaded calibrated threshold"
            );
            ThresholdSnapshot::from_calibration(&data)
        }
        Ok(None) => {
            info!(
                threshold = config.default_threshold(),
                location = %store.location(),
                "No calibration data found, using default threshold"
            );
            ThresholdSnapshot::default_for(config)
        }
        Err(err) => {
            error!(
                error = %err,
                threshold = config.default_threshold(),
                "Calibration data unusable, using default threshold"
            );
            ThresholdSnapshot::default_for(config)
        }
    }
}
