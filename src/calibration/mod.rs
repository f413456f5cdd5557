//! Split conformal calibration
//!
//! Given non-conformity scores `s_1..s_n` from a held-out calibration set and
//! a risk tolerance `alpha`, the threshold q̂ is the order statistic of rank
//! `k = ceil((n + 1)(1 - alpha))` (clipped to `[1, n]`). For a future sample
//! exchangeable with the calibration set, `P(score > q̂) <= alpha`; the `n + 1`
//! term is the finite-sample correction.
//!
//! The quantile uses the "higher" rule: q̂ is always one of the observed
//! scores, never an interpolation between two of them.

pub mod baseline;
pub mod dataset;
pub mod runner;
pub mod store;

pub use baseline::{baseline_loader, BASELINE_CORPUS, BASELINE_DATASET_NAME};
pub use dataset::{
    DatasetLoader, DirectoryDatasetLoader, InjectingLoader, JsonlDatasetLoader,
    StaticDatasetLoader, SYNTHETIC_VULNERABILITIES,
};
pub use runner::{CalibrationConfig, CalibrationRunner};
pub use store::{CalibrationStore, JsonCalibrationStore, MemoryCalibrationStore};

use crate::error::CalibrationError;
use tracing::info;

pub const MIN_CALIBRATION_SAMPLES: usize = 2;

/// Float noise guard so `(n + 1)(1 - alpha)` landing a hair above an integer
/// does not bump the rank.
const RANK_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConformalCalibrator;

impl ConformalCalibrator {
    pub fn new() -> Self {
        Self
    }

    /// Compute q̂ for `scores` at risk tolerance `alpha`.
    pub fn calibrate(&self, scores: &[f64], alpha: f64) -> Result<f64, CalibrationError> {
        let n = scores.len();
        if n < MIN_CALIBRATION_SAMPLES {
            return Err(CalibrationError::InsufficientSamples {
                required: MIN_CALIBRATION_SAMPLES,
                available: n,
            });
        }
        validate_alpha(alpha)?;
        if let Some((index, value)) = scores
            .iter()
            .enumerate()
            .find(|(_, s)| !(0.0..=1.0).contains(*s))
        {
            return Err(CalibrationError::InvalidScore {
                index,
                value: *value,
            });
        }

        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let rank = conformal_rank(n, alpha);
        let q_hat = sorted[rank - 1];

        info!(
            n,
            alpha,
            q_level = quantile_level(n, alpha),
            q_hat,
            "Calibration threshold computed"
        );
        Ok(q_hat)
    }
}

pub fn validate_alpha(alpha: f64) -> Result<f64, CalibrationError> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(alpha)
    } else {
        Err(CalibrationError::InvalidAlpha(alpha))
    }
}

/// 1-based rank of q̂ in the sorted scores.
pub fn conformal_rank(n: usize, alpha: f64) -> usize {
    let target = (n as f64 + 1.0) * (1.0 - alpha);
    let rank = (target - RANK_EPSILON).ceil();
    if rank <= 1.0 {
        1
    } else {
        (rank as usize).min(n)
    }
}

/// Corrected quantile level `min(1, ceil((n + 1)(1 - alpha)) / n)`.
pub fn quantile_level(n: usize, alpha: f64) -> f64 {
    if n == 0 {
        return 1.0;
    }
    let target = ((n as f64 + 1.0) * (1.0 - alpha) - RANK_EPSILON).ceil();
    (target / n as f64).min(1.0)
}

/// Fraction of `scores` strictly above `threshold`.
pub fn exceedance_rate(scores: &[f64], threshold: f64) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let above = scores.iter().filter(|s| **s > threshold).count();
    above as f64 / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrate(scores: &[f64], alpha: f64) -> f64 {
        ConformalCalibrator::new().calibrate(scores, alpha).unwrap()
    }

    fn scenario_c_scores() -> Vec<f64> {
        let mut scores = vec![0.0; 80];
        scores.extend(std::iter::repeat(0.1).take(10));
        scores.extend(std::iter::repeat(0.5).take(5));
        scores.extend(std::iter::repeat(1.0).take(5));
        scores
    }

    #[test]
    fn test_rejects_fewer_than_two_samples() {
        let calibrator = ConformalCalibrator::new();
        for scores in [vec![], vec![0.3]] {
            match calibrator.calibrate(&scores, 0.1) {
                Err(CalibrationError::InsufficientSamples {
                    required,
                    available,
                }) => {
                    assert_eq!(required, 2);
                    assert_eq!(available, scores.len());
                }
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn test_rejects_invalid_alpha() {
        let calibrator = ConformalCalibrator::new();
        for alpha in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            assert!(matches!(
                calibrator.calibrate(&[0.0, 0.5], alpha),
                Err(CalibrationError::InvalidAlpha(_))
            ));
        }
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        assert!(matches!(
            ConformalCalibrator::new().calibrate(&[0.0, 1.2, 0.5], 0.1),
            Err(CalibrationError::InvalidScore { index: 1, .. })
        ));
        assert!(ConformalCalibrator::new()
            .calibrate(&[0.0, f64::NAN], 0.1)
            .is_err());
    }

    #[test]
    fn test_all_zero_and_all_one() {
        assert_eq!(calibrate(&[0.0; 50], 0.1), 0.0);
        assert_eq!(calibrate(&[1.0; 50], 0.1), 1.0);
        assert_eq!(calibrate(&[0.0, 0.0], 0.5), 0.0);
    }

    #[test]
    fn test_scenario_distribution() {
        let scores = scenario_c_scores();
        // ceil(101 * 0.9) = 91 -> 91st smallest score is 0.5
        assert_eq!(conformal_rank(100, 0.1), 91);
        assert!((quantile_level(100, 0.1) - 0.91).abs() < 1e-12);
        assert_eq!(calibrate(&scores, 0.1), 0.5);
    }

    #[test]
    fn test_order_of_scores_does_not_matter() {
        let mut scores = scenario_c_scores();
        scores.reverse();
        assert_eq!(calibrate(&scores, 0.1), 0.5);
    }

    #[test]
    fn test_small_n_clips_to_max() {
        // ceil(4 * 0.9) = 4 > n = 3 -> maximum score
        assert_eq!(conformal_rank(3, 0.1), 3);
        assert_eq!(quantile_level(3, 0.1), 1.0);
        assert_eq!(calibrate(&[0.1, 0.0, 0.5], 0.1), 0.5);
    }

    #[test]
    fn test_exact_integer_target_not_bumped() {
        // (9 + 1) * 0.9 = 9 exactly, float noise must not yield rank 10
        assert_eq!(conformal_rank(9, 0.1), 9);
        assert_eq!(conformal_rank(19, 0.5), 10);
    }

    #[test]
    fn test_large_alpha_selects_minimum() {
        assert_eq!(conformal_rank(2, 0.99), 1);
        assert_eq!(calibrate(&[0.5, 0.1], 0.99), 0.1);
    }

    #[test]
    fn test_result_always_in_unit_interval() {
        let score_sets: Vec<Vec<f64>> = vec![
            vec![0.0, 1.0],
            vec![0.1, 0.1, 0.5],
            scenario_c_scores(),
            (0..37).map(|i| (i % 11) as f64 / 10.0).collect(),
        ];
        for scores in &score_sets {
            for step in 1..100 {
                let alpha = step as f64 / 100.0;
                let q = calibrate(scores, alpha);
                assert!((0.0..=1.0).contains(&q));
                assert!(scores.contains(&q), "q̂ must be an observed score");
            }
        }
    }

    #[test]
    fn test_monotone_in_alpha() {
        let scores: Vec<f64> = (0..64).map(|i| ((i * 7) % 10) as f64 / 10.0).collect();
        let mut previous = f64::INFINITY;
        for step in 1..100 {
            let alpha = step as f64 / 100.0;
            let q = calibrate(&scores, alpha);
            assert!(q <= previous, "alpha {alpha}: {q} > {previous}");
            previous = q;
        }
    }

    #[test]
    fn test_exceedance_rate() {
        let scores = scenario_c_scores();
        assert!((exceedance_rate(&scores, 0.5) - 0.05).abs() < 1e-12);
        assert_eq!(exceedance_rate(&[], 0.5), 0.0);
    }
}
