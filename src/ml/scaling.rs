//! Min-max scaling of temporal features to `[0, 1]`.
//!
//! The original study fits the scaler over the full table, training and
//! held-out season alike, before sequences are built. That leaks test-season
//! ranges into the transform, so the fit can optionally be restricted to
//! training rows; both paths are deterministic and the choice is recorded in
//! the pipeline settings.

use serde::{Deserialize, Serialize};

/// Per-column min/max fitted over a row matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub mins: Vec<f32>,
    pub maxs: Vec<f32>,
}

impl MinMaxScaler {
    /// Fit over every row.
    pub fn fit(rows: &[Vec<f32>], width: usize) -> Self {
        Self::fit_where(rows, width, |_| true)
    }

    /// Fit over the rows selected by `include` (by row index).
    pub fn fit_where<F: Fn(usize) -> bool>(rows: &[Vec<f32>], width: usize, include: F) -> Self {
        let mut mins = vec![f32::INFINITY; width];
        let mut maxs = vec![f32::NEG_INFINITY; width];
        for (i, row) in rows.iter().enumerate() {
            if !include(i) {
                continue;
            }
            for (j, &value) in row.iter().take(width).enumerate() {
                if value.is_finite() {
                    mins[j] = mins[j].min(value);
                    maxs[j] = maxs[j].max(value);
                }
            }
        }
        for j in 0..width {
            if !mins[j].is_finite() || !maxs[j].is_finite() {
                mins[j] = 0.0;
                maxs[j] = 0.0;
            }
        }
        Self { mins, maxs }
    }

    /// Scale a row in place. Constant columns map to 0; values outside the
    /// fitted range (possible under a training-only fit) are not clamped.
    pub fn transform(&self, row: &mut [f32]) {
        for (j, value) in row.iter_mut().enumerate() {
            let min = self.mins[j];
            let max = self.maxs[j];
            *value = if max > min { (*value - min) / (max - min) } else { 0.0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_each_column_independently() {
        let rows = vec![vec![0.0, 10.0], vec![5.0, 20.0], vec![10.0, 30.0]];
        let scaler = MinMaxScaler::fit(&rows, 2);
        let mut row = vec![5.0, 30.0];
        scaler.transform(&mut row);
        assert_eq!(row, vec![0.5, 1.0]);
    }

    #[test]
    fn constant_columns_map_to_zero() {
        let rows = vec![vec![7.0], vec![7.0]];
        let scaler = MinMaxScaler::fit(&rows, 1);
        let mut row = vec![7.0];
        scaler.transform(&mut row);
        assert_eq!(row, vec![0.0]);
    }

    #[test]
    fn train_only_fit_differs_from_full_fit() {
        // The held-out row carries the maximum; the two fits must disagree.
        let rows = vec![vec![0.0], vec![5.0], vec![10.0]];
        let is_test = [false, false, true];

        let full = MinMaxScaler::fit(&rows, 1);
        let train_only = MinMaxScaler::fit_where(&rows, 1, |i| !is_test[i]);

        let mut under_full = vec![5.0];
        full.transform(&mut under_full);
        let mut under_train_only = vec![5.0];
        train_only.transform(&mut under_train_only);

        assert_eq!(under_full, vec![0.5]);
        assert_eq!(under_train_only, vec![1.0]);
        // Unseen test values may exceed 1 under the training-only fit.
        let mut test_row = vec![10.0];
        train_only.transform(&mut test_row);
        assert_eq!(test_row, vec![2.0]);
    }
}
