//! Deterministic gradient-boosted decision-stump regressor.
//!
//! A lightweight least-squares booster that avoids external ML dependencies
//! while still supporting:
//! - Binned split search with exact leaf means.
//! - Row subsampling per boosting round.
//! - Randomized hyperparameter search with k-fold cross-validation.
//! - Reproducible JSON model export/load.

mod model;
mod train;

pub use model::{GbdtRegressor, Stump};
pub use train::{
    SearchOptions, SearchSpace, TrainDataset, TrainOptions, randomized_search, train_gbdt,
};
