//! Evaluation metrics for regression models.

use serde::{Deserialize, Serialize};

/// Serialized metrics snapshot for the report stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Coefficient of determination.
    pub r2: f32,
    /// Root-mean-squared error in target units.
    pub rmse: f32,
}

impl RegressionMetrics {
    /// Compute both metrics from aligned truth/prediction slices.
    pub fn from_predictions(truth: &[f32], predicted: &[f32]) -> Self {
        Self {
            r2: r2_score(truth, predicted),
            rmse: root_mean_squared_error(truth, predicted),
        }
    }
}

/// Coefficient of determination `1 - SS_res / SS_tot`.
///
/// Returns 0 when the truth is constant (no variance to explain) or the
/// slices are empty.
pub fn r2_score(truth: &[f32], predicted: &[f32]) -> f32 {
    let n = truth.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let mean = truth[..n].iter().sum::<f32>() / n as f32;
    let mut ss_res = 0.0f64;
    let mut ss_tot = 0.0f64;
    for i in 0..n {
        let res = (truth[i] - predicted[i]) as f64;
        let dev = (truth[i] - mean) as f64;
        ss_res += res * res;
        ss_tot += dev * dev;
    }
    if ss_tot == 0.0 {
        return 0.0;
    }
    (1.0 - ss_res / ss_tot) as f32
}

/// Root-mean-squared error.
pub fn root_mean_squared_error(truth: &[f32], predicted: &[f32]) -> f32 {
    let n = truth.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for i in 0..n {
        let diff = (truth[i] - predicted[i]) as f64;
        sum += diff * diff;
    }
    (sum / n as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_score_one() {
        let truth = [1.0, 2.0, 3.0];
        assert_eq!(r2_score(&truth, &truth), 1.0);
        assert_eq!(root_mean_squared_error(&truth, &truth), 0.0);
    }

    #[test]
    fn mean_predictor_scores_zero() {
        let truth = [1.0, 2.0, 3.0];
        let mean = [2.0, 2.0, 2.0];
        assert!(r2_score(&truth, &mean).abs() < 1e-6);
    }

    #[test]
    fn rmse_matches_hand_computation() {
        let truth = [0.0, 0.0];
        let predicted = [3.0, 4.0];
        // sqrt((9 + 16) / 2) = sqrt(12.5)
        assert!((root_mean_squared_error(&truth, &predicted) - 12.5f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn constant_truth_yields_zero_r2() {
        assert_eq!(r2_score(&[5.0, 5.0], &[5.0, 5.0]), 0.0);
    }
}
