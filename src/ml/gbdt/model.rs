//! Boosted-stump regressor weights and inference.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Single-node decision tree used as a weak learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    /// Feature index used for the split.
    pub feature_index: u16,
    /// Threshold in feature units.
    pub threshold: f32,
    /// Prediction for `feature <= threshold`.
    pub left_value: f32,
    /// Prediction for `feature > threshold`.
    pub right_value: f32,
}

impl Stump {
    /// Predict the stump value for a feature vector.
    pub fn predict(&self, features: &[f32]) -> f32 {
        let idx = self.feature_index as usize;
        let value = features.get(idx).copied().unwrap_or(0.0);
        if value <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }
}

/// Gradient-boosted decision-stump model for scalar regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtRegressor {
    /// Model format version.
    pub model_version: i64,
    /// Number of `f32` values per feature vector.
    pub feature_len: usize,
    /// Learning rate applied to each stump prediction.
    pub learning_rate: f32,
    /// Initial prediction before boosting rounds (the training-target mean).
    pub base_prediction: f32,
    /// One stump per boosting round.
    pub stumps: Vec<Stump>,
}

impl GbdtRegressor {
    /// Validate structural invariants of the model.
    pub fn validate(&self) -> Result<(), String> {
        if self.feature_len == 0 {
            return Err("Model must accept at least one feature".to_string());
        }
        for (round, stump) in self.stumps.iter().enumerate() {
            if stump.feature_index as usize >= self.feature_len {
                return Err(format!(
                    "Round {round} splits on feature {} but the model has {}",
                    stump.feature_index, self.feature_len
                ));
            }
        }
        Ok(())
    }

    /// Load a model from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self, String> {
        let bytes = std::fs::read(path).map_err(|err| err.to_string())?;
        let model: Self = serde_json::from_slice(&bytes).map_err(|err| err.to_string())?;
        model.validate()?;
        Ok(model)
    }

    /// Predict the target for a feature vector.
    pub fn predict(&self, features: &[f32]) -> f32 {
        let mut prediction = self.base_prediction;
        for stump in &self.stumps {
            prediction += self.learning_rate * stump.predict(features);
        }
        prediction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stump_predict_branches() {
        let stump = Stump {
            feature_index: 0,
            threshold: 0.5,
            left_value: -1.0,
            right_value: 2.0,
        };
        assert_eq!(stump.predict(&[0.0]), -1.0);
        assert_eq!(stump.predict(&[0.5]), -1.0);
        assert_eq!(stump.predict(&[0.6]), 2.0);
    }

    #[test]
    fn prediction_accumulates_shrunk_stumps() {
        let model = GbdtRegressor {
            model_version: 1,
            feature_len: 1,
            learning_rate: 0.5,
            base_prediction: 10.0,
            stumps: vec![
                Stump {
                    feature_index: 0,
                    threshold: 0.0,
                    left_value: -2.0,
                    right_value: 4.0,
                },
                Stump {
                    feature_index: 0,
                    threshold: 0.0,
                    left_value: -2.0,
                    right_value: 4.0,
                },
            ],
        };
        assert_eq!(model.predict(&[-1.0]), 10.0 - 2.0);
        assert_eq!(model.predict(&[1.0]), 10.0 + 4.0);
    }

    #[test]
    fn validate_rejects_out_of_range_splits() {
        let model = GbdtRegressor {
            model_version: 1,
            feature_len: 2,
            learning_rate: 0.1,
            base_prediction: 0.0,
            stumps: vec![Stump {
                feature_index: 5,
                threshold: 0.0,
                left_value: 0.0,
                right_value: 0.0,
            }],
        };
        assert!(model.validate().is_err());
    }
}
