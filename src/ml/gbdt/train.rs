//! Least-squares stump boosting and randomized hyperparameter search.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};

use super::model::{GbdtRegressor, Stump};

/// Training hyperparameters for one boosting run.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Number of boosting rounds.
    pub rounds: usize,
    /// Learning rate applied per round.
    pub learning_rate: f32,
    /// Number of bins used for split search.
    pub bins: usize,
    /// Fraction of rows sampled (without replacement) per round.
    pub subsample: f32,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            rounds: 300,
            learning_rate: 0.05,
            bins: 32,
            subsample: 1.0,
            seed: 42,
        }
    }
}

/// In-memory dataset used for training and evaluation.
#[derive(Debug, Clone)]
pub struct TrainDataset {
    /// Number of `f32` values in each feature vector.
    pub feature_len: usize,
    /// Feature matrix, row-major.
    pub x: Vec<Vec<f32>>,
    /// Targets aligned with `x`.
    pub y: Vec<f32>,
}

/// Train a regression stump-GBDT with least-squares boosting.
pub fn train_gbdt(dataset: &TrainDataset, options: &TrainOptions) -> Result<GbdtRegressor, String> {
    if dataset.x.len() != dataset.y.len() {
        return Err("Mismatched X/Y lengths".to_string());
    }
    if dataset.x.is_empty() {
        return Err("Empty dataset".to_string());
    }

    let n = dataset.x.len();
    let d = dataset.feature_len;
    let (mins, maxs) = compute_feature_min_max(&dataset.x, d);
    let binned = bin_features(&dataset.x, &mins, &maxs, options.bins);

    let base = dataset.y.iter().sum::<f32>() / n as f32;
    let mut predictions = vec![base; n];
    let mut residuals = vec![0.0f32; n];

    let subsample = options.subsample.clamp(0.05, 1.0);
    let sample_len = ((n as f32 * subsample).round() as usize).clamp(1, n);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut row_order: Vec<usize> = (0..n).collect();

    let mut stumps = Vec::with_capacity(options.rounds);
    for _round in 0..options.rounds {
        for i in 0..n {
            residuals[i] = dataset.y[i] - predictions[i];
        }

        let sample: &[usize] = if sample_len < n {
            row_order.shuffle(&mut rng);
            &row_order[..sample_len]
        } else {
            &row_order
        };

        let stump = fit_best_stump(
            &binned,
            &dataset.x,
            &mins,
            &maxs,
            options.bins,
            &residuals,
            sample,
        );
        for i in 0..n {
            predictions[i] += options.learning_rate * stump.predict(&dataset.x[i]);
        }
        stumps.push(stump);
    }

    Ok(GbdtRegressor {
        model_version: 1,
        feature_len: d,
        learning_rate: options.learning_rate,
        base_prediction: base,
        stumps,
    })
}

/// Hyperparameter grid sampled by the randomized search.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    pub rounds: Vec<usize>,
    pub learning_rate: Vec<f32>,
    pub bins: Vec<usize>,
    pub subsample: Vec<f32>,
}

/// Randomized-search budget and validation scheme.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub space: SearchSpace,
    /// Number of random configurations to evaluate.
    pub iterations: usize,
    /// Cross-validation folds per configuration.
    pub folds: usize,
    pub seed: u64,
}

/// Randomized hyperparameter search with k-fold cross-validation.
///
/// Each candidate is scored by its mean validation MSE across folds; the
/// best candidate is refit on the full dataset.
pub fn randomized_search(
    dataset: &TrainDataset,
    options: &SearchOptions,
) -> Result<(GbdtRegressor, TrainOptions), String> {
    if dataset.x.len() != dataset.y.len() {
        return Err("Mismatched X/Y lengths".to_string());
    }
    let folds = options.folds.max(2);
    if dataset.x.len() < folds {
        return Err(format!(
            "Need at least {folds} rows for {folds}-fold validation, have {}",
            dataset.x.len()
        ));
    }

    let mut rng = StdRng::seed_from_u64(options.seed);

    // Deterministic fold assignment over a shuffled row order.
    let mut order: Vec<usize> = (0..dataset.x.len()).collect();
    order.shuffle(&mut rng);
    let fold_of: Vec<usize> = {
        let mut fold_of = vec![0usize; dataset.x.len()];
        for (position, &row) in order.iter().enumerate() {
            fold_of[row] = position % folds;
        }
        fold_of
    };

    let mut best_options: Option<TrainOptions> = None;
    let mut best_score = f64::INFINITY;
    for iteration in 0..options.iterations.max(1) {
        let candidate = TrainOptions {
            rounds: pick(&mut rng, &options.space.rounds).unwrap_or(300),
            learning_rate: pick(&mut rng, &options.space.learning_rate).unwrap_or(0.05),
            bins: pick(&mut rng, &options.space.bins).unwrap_or(32),
            subsample: pick(&mut rng, &options.space.subsample).unwrap_or(1.0),
            seed: options.seed,
        };

        let mut fold_mse = 0.0f64;
        for fold in 0..folds {
            let (train, validation) = split_fold(dataset, &fold_of, fold);
            let model = train_gbdt(&train, &candidate)?;
            fold_mse += mse(&model, &validation);
        }
        let score = fold_mse / folds as f64;
        tracing::debug!(
            "Search iteration {iteration}: rounds={}, lr={}, bins={}, subsample={}, mse={score:.4}",
            candidate.rounds,
            candidate.learning_rate,
            candidate.bins,
            candidate.subsample
        );
        if score < best_score {
            best_score = score;
            best_options = Some(candidate);
        }
    }

    let best_options = best_options.ok_or_else(|| "Search evaluated no candidates".to_string())?;
    tracing::info!(
        "Best regressor configuration: rounds={}, lr={}, bins={}, subsample={} (cv mse {best_score:.4})",
        best_options.rounds,
        best_options.learning_rate,
        best_options.bins,
        best_options.subsample
    );
    let model = train_gbdt(dataset, &best_options)?;
    Ok((model, best_options))
}

fn pick<T: Copy>(rng: &mut StdRng, values: &[T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    Some(values[rng.random_range(0..values.len())])
}

fn split_fold(
    dataset: &TrainDataset,
    fold_of: &[usize],
    fold: usize,
) -> (TrainDataset, TrainDataset) {
    let mut train = TrainDataset {
        feature_len: dataset.feature_len,
        x: Vec::new(),
        y: Vec::new(),
    };
    let mut validation = TrainDataset {
        feature_len: dataset.feature_len,
        x: Vec::new(),
        y: Vec::new(),
    };
    for i in 0..dataset.x.len() {
        let target = if fold_of[i] == fold {
            &mut validation
        } else {
            &mut train
        };
        target.x.push(dataset.x[i].clone());
        target.y.push(dataset.y[i]);
    }
    (train, validation)
}

fn mse(model: &GbdtRegressor, dataset: &TrainDataset) -> f64 {
    if dataset.x.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for (row, &target) in dataset.x.iter().zip(dataset.y.iter()) {
        let diff = (model.predict(row) - target) as f64;
        sum += diff * diff;
    }
    sum / dataset.x.len() as f64
}

fn compute_feature_min_max(x: &[Vec<f32>], feature_len: usize) -> (Vec<f32>, Vec<f32>) {
    let mut mins = vec![f32::INFINITY; feature_len];
    let mut maxs = vec![f32::NEG_INFINITY; feature_len];
    for row in x {
        for (j, &v) in row.iter().take(feature_len).enumerate() {
            if v.is_finite() {
                mins[j] = mins[j].min(v);
                maxs[j] = maxs[j].max(v);
            }
        }
    }
    for j in 0..feature_len {
        if !mins[j].is_finite() || !maxs[j].is_finite() {
            mins[j] = 0.0;
            maxs[j] = 0.0;
        }
        if mins[j] == maxs[j] {
            maxs[j] = mins[j] + 1.0;
        }
    }
    (mins, maxs)
}

fn bin_features(x: &[Vec<f32>], mins: &[f32], maxs: &[f32], bins: usize) -> Vec<Vec<u8>> {
    let bins = bins.clamp(2, 256) as f32;
    let mut out: Vec<Vec<u8>> = Vec::with_capacity(x.len());
    for row in x {
        let mut binned = Vec::with_capacity(mins.len());
        for (j, &min) in mins.iter().enumerate() {
            let max = maxs[j];
            let v = row.get(j).copied().unwrap_or(0.0);
            let t = if max > min {
                ((v - min) / (max - min)).clamp(0.0, 1.0)
            } else {
                0.0
            };
            binned.push((t * (bins - 1.0)).round() as u8);
        }
        out.push(binned);
    }
    out
}

fn fit_best_stump(
    binned: &[Vec<u8>],
    x: &[Vec<f32>],
    mins: &[f32],
    maxs: &[f32],
    bins: usize,
    residuals: &[f32],
    sample: &[usize],
) -> Stump {
    let n_features = mins.len();
    let bins = bins.clamp(2, 256);

    let mut best = BestSplit::default();
    for feature_idx in 0..n_features {
        let split = best_split_for_feature(binned, residuals, sample, feature_idx, bins);
        if split.score < best.score {
            best = split;
        }
    }

    let feature_idx = best.feature_index;
    let threshold = threshold_for_bin(mins[feature_idx], maxs[feature_idx], best.split_bin, bins);
    let (left_value, right_value) =
        leaf_means_for_threshold(x, residuals, sample, feature_idx, threshold);
    Stump {
        feature_index: feature_idx as u16,
        threshold,
        left_value,
        right_value,
    }
}

#[derive(Debug, Clone)]
struct BestSplit {
    score: f64,
    feature_index: usize,
    split_bin: usize,
}

impl Default for BestSplit {
    fn default() -> Self {
        Self {
            score: f64::INFINITY,
            feature_index: 0,
            split_bin: 0,
        }
    }
}

fn best_split_for_feature(
    binned: &[Vec<u8>],
    residuals: &[f32],
    sample: &[usize],
    feature_idx: usize,
    bins: usize,
) -> BestSplit {
    let mut counts = vec![0u32; bins];
    let mut sums = vec![0f64; bins];
    let mut sums_sq = vec![0f64; bins];
    for &i in sample {
        let b = binned[i].get(feature_idx).copied().unwrap_or(0) as usize;
        let r = residuals[i] as f64;
        counts[b] += 1;
        sums[b] += r;
        sums_sq[b] += r * r;
    }
    let total_count: u32 = counts.iter().sum();
    if total_count == 0 {
        return BestSplit::default();
    }
    let total_sum: f64 = sums.iter().sum();
    let total_sum_sq: f64 = sums_sq.iter().sum();

    let mut best_score = f64::INFINITY;
    let mut best_bin = 0usize;

    let mut left_count = 0u32;
    let mut left_sum = 0f64;
    let mut left_sum_sq = 0f64;

    for split_bin in 0..(bins - 1) {
        left_count += counts[split_bin];
        left_sum += sums[split_bin];
        left_sum_sq += sums_sq[split_bin];
        let right_count = total_count - left_count;
        if left_count == 0 || right_count == 0 {
            continue;
        }
        let right_sum = total_sum - left_sum;
        let right_sum_sq = total_sum_sq - left_sum_sq;
        let left_sse = left_sum_sq - (left_sum * left_sum) / left_count as f64;
        let right_sse = right_sum_sq - (right_sum * right_sum) / right_count as f64;
        let score = left_sse + right_sse;
        if score < best_score {
            best_score = score;
            best_bin = split_bin;
        }
    }

    BestSplit {
        score: best_score,
        feature_index: feature_idx,
        split_bin: best_bin,
    }
}

fn threshold_for_bin(min: f32, max: f32, split_bin: usize, bins: usize) -> f32 {
    let bins_f = bins as f32;
    let t = ((split_bin + 1) as f32) / bins_f;
    min + t * (max - min)
}

fn leaf_means_for_threshold(
    x: &[Vec<f32>],
    residuals: &[f32],
    sample: &[usize],
    feature_idx: usize,
    threshold: f32,
) -> (f32, f32) {
    let mut left_sum = 0.0f32;
    let mut left_count = 0u32;
    let mut right_sum = 0.0f32;
    let mut right_count = 0u32;
    for &i in sample {
        let v = x[i].get(feature_idx).copied().unwrap_or(0.0);
        if v <= threshold {
            left_sum += residuals[i];
            left_count += 1;
        } else {
            right_sum += residuals[i];
            right_count += 1;
        }
    }
    let left_mean = if left_count == 0 {
        0.0
    } else {
        left_sum / left_count as f32
    };
    let right_mean = if right_count == 0 {
        0.0
    } else {
        right_sum / right_count as f32
    };
    (left_mean, right_mean)
}
