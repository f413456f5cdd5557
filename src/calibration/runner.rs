//! One full calibration pass: load → score → calibrate → persist.

use super::dataset::DatasetLoader;
use super::store::CalibrationStore;
use super::{validate_alpha, ConformalCalibrator};
use crate::error::CalibrationError;
use crate::models::CalibrationData;
use crate::scoring::ScoringService;
use crate::util::sha256_prefix;
use chrono::Utc;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

const PROGRESS_EVERY: usize = 20;
const HASHED_PREFIX_SAMPLES: usize = 10;
const DATASET_HASH_CHARS: usize = 12;

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Risk tolerance
    pub alpha: f64,
    pub n_samples: usize,
    /// Scoring worker threads; 1 scores sequentially
    pub workers: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            n_samples: 100,
            workers: 1,
        }
    }
}

pub struct CalibrationRunner {
    scorer: Arc<dyn ScoringService>,
    loader: Box<dyn DatasetLoader>,
    store: Arc<dyn CalibrationStore>,
    calibrator: ConformalCalibrator,
    config: CalibrationConfig,
}

impl CalibrationRunner {
    pub fn new(
        scorer: Arc<dyn ScoringService>,
        loader: Box<dyn DatasetLoader>,
        store: Arc<dyn CalibrationStore>,
        config: CalibrationConfig,
    ) -> Self {
        Self {
            scorer,
            loader,
            store,
            calibrator: ConformalCalibrator::new(),
            config,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Run the pass and persist the result. Every failure is returned to the
    /// caller, including analyzer failures a fail-closed scorer would
    /// otherwise turn into 1.0; nothing is saved unless the whole pass
    /// succeeds.
    #[instrument(skip_all, fields(dataset = self.loader.name(), alpha = self.config.alpha))]
    pub fn run(&self) -> Result<CalibrationData, CalibrationError> {
        validate_alpha(self.config.alpha)?;

        let samples = self.loader.load(self.config.n_samples)?;
        info!(samples = samples.len(), "Loaded calibration samples");
        if samples.is_empty() {
            return Err(CalibrationError::DatasetLoad {
                dataset: self.loader.name().to_string(),
                details: "dataset produced no samples".to_string(),
            });
        }

        let scores = self.score_samples(&samples)?;
        let q_hat = self.calibrator.calibrate(&scores, self.config.alpha)?;

        let data = CalibrationData {
            q_hat,
            alpha: self.config.alpha,
            n_samples: samples.len(),
            scores,
            dataset_name: self.loader.name().to_string(),
            dataset_hash: dataset_hash(&samples),
            scorer_name: self.scorer.name().to_string(),
            scorer_version: self.scorer.version().to_string(),
            calibrated_at: Utc::now(),
            notes: self.loader.notes(),
        };
        data.validate()?;

        self.store.save(&data)?;
        info!(q_hat, location = %self.store.location(), "Calibration complete");
        Ok(data)
    }

    /// Score every sample, keeping `scores[i]` paired with `samples[i]`.
    fn score_samples(&self, samples: &[String]) -> Result<Vec<f64>, CalibrationError> {
        let total = samples.len();
        let done = AtomicUsize::new(0);

        let score_one = |(index, code): (usize, &String)| -> Result<f64, CalibrationError> {
            let score = self
                .scorer
                .analyze_strict(code)
                .map_err(|source| CalibrationError::Scoring { index, source })?
                .score;
            if !(0.0..=1.0).contains(&score) {
                return Err(CalibrationError::InvalidScore { index, value: score });
            }
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            if finished % PROGRESS_EVERY == 0 {
                info!(finished, total, "Scoring progress");
            }
            Ok(score)
        };

        let workers = self.config.workers.max(1);
        if workers == 1 {
            return samples.iter().enumerate().map(score_one).collect();
        }

        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| samples.par_iter().enumerate().map(score_one).collect()),
            Err(err) => {
                warn!(error = %err, "Failed to build scoring pool, scoring sequentially");
                samples.iter().enumerate().map(score_one).collect()
            }
        }
    }
}

/// Provenance hash over the first few samples.
pub fn dataset_hash(samples: &[String]) -> String {
    let prefix: String = samples
        .iter()
        .take(HASHED_PREFIX_SAMPLES)
        .map(String::as_str)
        .collect();
    sha256_prefix(prefix.as_bytes(), DATASET_HASH_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::dataset::StaticDatasetLoader;
    use crate::calibration::store::MemoryCalibrationStore;
    use crate::error::ScoringError;
    use crate::models::ScoringResult;

    /// Scores a snippet by looking up its numeric body, e.g. "0.5" -> 0.5.
    struct LiteralScorer {
        fail_on: Option<String>,
    }

    impl ScoringService for LiteralScorer {
        fn name(&self) -> &str {
            "literal"
        }

        fn version(&self) -> &str {
            "test"
        }

        fn analyze(&self, code: &str) -> Result<ScoringResult, ScoringError> {
            if self.fail_on.as_deref() == Some(code) {
                return Err(ScoringError::Execution("boom".into()));
            }
            let score = code.trim().parse::<f64>().unwrap_or(1.0);
            Ok(ScoringResult {
                score,
                issues: Vec::new(),
                error: None,
            })
        }
    }

    fn scenario_samples() -> Vec<String> {
        let mut samples = vec!["0.0".to_string(); 80];
        samples.extend(vec!["0.1".to_string(); 10]);
        samples.extend(vec!["0.5".to_string(); 5]);
        samples.extend(vec!["1.0".to_string(); 5]);
        samples
    }

    fn runner(
        samples: Vec<String>,
        workers: usize,
        store: Arc<MemoryCalibrationStore>,
        fail_on: Option<&str>,
    ) -> CalibrationRunner {
        CalibrationRunner::new(
            Arc::new(LiteralScorer {
                fail_on: fail_on.map(str::to_string),
            }),
            Box::new(StaticDatasetLoader::new("static", samples)),
            store,
            CalibrationConfig {
                alpha: 0.1,
                n_samples: 100,
                workers,
            },
        )
    }

    #[test]
    fn test_run_computes_and_persists() {
        let store = Arc::new(MemoryCalibrationStore::new());
        let data = runner(scenario_samples(), 1, store.clone(), None).run().unwrap();

        assert_eq!(data.q_hat, 0.5);
        assert_eq!(data.n_samples, 100);
        assert_eq!(data.scores.len(), 100);
        assert_eq!(data.scorer_name, "literal");
        assert_eq!(data.dataset_name, "static");
        assert_eq!(data.dataset_hash.len(), 12);
        assert_eq!(store.load().unwrap(), Some(data));
    }

    #[test]
    fn test_parallel_scoring_preserves_index_order() {
        let samples: Vec<String> = (0..100).map(|i| format!("{}", (i % 10) as f64 / 10.0)).collect();
        let store = Arc::new(MemoryCalibrationStore::new());
        let data = runner(samples.clone(), 4, store, None).run().unwrap();
        for (sample, score) in samples.iter().zip(&data.scores) {
            assert_eq!(sample.parse::<f64>().unwrap(), *score);
        }
    }

    #[test]
    fn test_scoring_failure_is_fatal_and_nothing_saved() {
        let store = Arc::new(MemoryCalibrationStore::new());
        let err = runner(scenario_samples(), 1, store.clone(), Some("0.5"))
            .run()
            .unwrap_err();
        assert!(matches!(err, CalibrationError::Scoring { index: 90, .. }));
        assert!(store.load().unwrap().is_none());
    }

    /// Fails closed on the gate path but reports the backend error strictly.
    struct OfflineScorer;

    impl ScoringService for OfflineScorer {
        fn name(&self) -> &str {
            "offline"
        }

        fn version(&self) -> &str {
            "test"
        }

        fn analyze(&self, _code: &str) -> Result<ScoringResult, ScoringError> {
            Ok(ScoringResult::failed("analyzer not found"))
        }

        fn analyze_strict(&self, _code: &str) -> Result<ScoringResult, ScoringError> {
            Err(ScoringError::BackendMissing("offline".into()))
        }
    }

    #[test]
    fn test_fail_closed_backend_failure_aborts_calibration() {
        let store = Arc::new(MemoryCalibrationStore::new());
        let runner = CalibrationRunner::new(
            Arc::new(OfflineScorer),
            Box::new(StaticDatasetLoader::new("static", scenario_samples())),
            store.clone(),
            CalibrationConfig::default(),
        );

        let err = runner.run().unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::Scoring {
                index: 0,
                source: ScoringError::BackendMissing(_)
            }
        ));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_single_sample_is_insufficient() {
        let store = Arc::new(MemoryCalibrationStore::new());
        let err = runner(vec!["0.0".into()], 1, store, None).run().unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::InsufficientSamples { available: 1, .. }
        ));
    }

    #[test]
    fn test_empty_dataset_is_load_error() {
        let store = Arc::new(MemoryCalibrationStore::new());
        let err = runner(Vec::new(), 1, store, None).run().unwrap_err();
        assert!(matches!(err, CalibrationError::DatasetLoad { .. }));
    }

    #[test]
    fn test_dataset_hash_only_uses_prefix() {
        let mut a: Vec<String> = (0..12).map(|i| format!("x = {i}")).collect();
        let hash = dataset_hash(&a);
        a[11] = "changed".into();
        assert_eq!(dataset_hash(&a), hash);
        a[0] = "changed".into();
        assert_ne!(dataset_hash(&a), hash);
    }
}
