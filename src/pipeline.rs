//! Stage orchestration and error containment.
//!
//! Each stage (prepare → master → features → train) fully materializes its
//! CSV artifacts before the next one starts, so any stage can be re-run from
//! the persisted intermediates. Within the feature and training stages the
//! three granularities are independent: a failure in one is logged and the
//! siblings proceed. The run always ends with a summary listing which
//! granularities produced metrics and which were skipped, with the reason.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::features::{self, FeatureTable};
use crate::master::{self, Granularity};
use crate::ml::hybrid::{self, HybridOutcome};
use crate::ml::metrics::RegressionMetrics;
use crate::settings::PipelineSettings;
use crate::tables::{self, TableError};

/// Errors that abort a whole pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("failed to write {path}: {source}")]
    WriteArtifact {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What happened to one granularity during training.
#[derive(Debug, Clone)]
pub enum GranularityOutcome {
    Completed(RegressionMetrics),
    Skipped(String),
}

/// Per-granularity results of a training run.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub entries: Vec<(Granularity, GranularityOutcome)>,
}

impl PipelineSummary {
    /// Metrics keyed by model identifier, as consumed by the report stage.
    pub fn results_map(&self) -> BTreeMap<String, RegressionMetrics> {
        self.entries
            .iter()
            .filter_map(|(granularity, outcome)| match outcome {
                GranularityOutcome::Completed(metrics) => {
                    Some((format!("hibrido_{}", granularity.as_str()), *metrics))
                }
                GranularityOutcome::Skipped(_) => None,
            })
            .collect()
    }
}

/// Stage 01-03: clean the three raw tables into the processed directory.
pub fn run_prepare(settings: &PipelineSettings) -> Result<(), PipelineError> {
    tracing::info!("Preparing input tables");
    tables::prepare_ndvi(
        &settings.paths.raw_ndvi(),
        &settings.paths.processed_ndvi(),
        &settings.municipalities,
    )?;
    tables::prepare_yield(&settings.paths.raw_yield(), &settings.paths.processed_yield())?;
    tables::prepare_climate(
        &settings.paths.raw_climate(),
        &settings.paths.processed_climate(),
        &settings.season_months,
    )?;
    Ok(())
}

/// Stage 04: join the processed tables and write the three master tables.
pub fn run_master(settings: &PipelineSettings) -> Result<(), PipelineError> {
    tracing::info!("Building master datasets");
    let climate = tables::read_climate(&settings.paths.processed_climate())?;
    let ndvi = tables::read_ndvi(&settings.paths.processed_ndvi())?;
    let yields = tables::read_yield(&settings.paths.processed_yield())?;

    let daily = master::build_daily(&climate, &ndvi, &yields, &settings.municipalities);
    let monthly = master::aggregate_monthly(&daily);
    let annual = master::aggregate_annual(&daily);

    for table in [&daily, &monthly, &annual] {
        let path = settings.paths.master_table(table.granularity);
        master::write_master(&path, table)?;
        tracing::info!(
            "Master {} table written to {} ({} rows)",
            table.granularity.as_str(),
            path.display(),
            table.rows.len()
        );
    }
    Ok(())
}

/// Stage 05: feature-engineer each master table independently.
pub fn run_features(settings: &PipelineSettings) -> Result<(), PipelineError> {
    for granularity in Granularity::all() {
        let input = settings.paths.master_table(granularity);
        let mut table = match master::read_master(&input, granularity) {
            Ok(table) => table,
            Err(err) => {
                tracing::error!(
                    "Skipping {} features: {err}",
                    granularity.as_str()
                );
                continue;
            }
        };
        // Rolling windows assume this order.
        table.sort_rows();
        let featured = features::engineer_features(&table, &settings.thresholds);
        let output = settings.paths.feature_table(granularity);
        features::write_features(&output, &featured)?;
        tracing::info!(
            "Feature {} table written to {} ({} rows)",
            granularity.as_str(),
            output.display(),
            featured.rows.len()
        );
    }
    Ok(())
}

/// Stage 06: train and evaluate the hybrid model per granularity, persist
/// model artifacts and the results mapping, and log the final summary.
pub fn run_train(settings: &PipelineSettings) -> Result<PipelineSummary, PipelineError> {
    let mut entries = Vec::new();
    for granularity in Granularity::all() {
        let outcome = train_granularity(settings, granularity);
        entries.push((granularity, outcome));
    }
    let summary = PipelineSummary { entries };

    let results = summary.results_map();
    let results_path = settings.paths.results_file();
    write_json(&results_path, &results)?;
    tracing::info!("Results written to {}", results_path.display());

    tracing::info!("--- FINAL RESULTS SUMMARY ---");
    for (granularity, outcome) in &summary.entries {
        match outcome {
            GranularityOutcome::Completed(metrics) => tracing::info!(
                "hibrido_{:<7} | R²: {:.4} | RMSE: {:.4} sc/ha",
                granularity.as_str(),
                metrics.r2,
                metrics.rmse
            ),
            GranularityOutcome::Skipped(reason) => tracing::info!(
                "hibrido_{:<7} | skipped: {reason}",
                granularity.as_str()
            ),
        }
    }
    Ok(summary)
}

fn train_granularity(settings: &PipelineSettings, granularity: Granularity) -> GranularityOutcome {
    let path = settings.paths.feature_table(granularity);
    let table: FeatureTable = match features::read_features(&path, granularity) {
        Ok(table) => table,
        Err(err) => {
            tracing::error!("Cannot load {} features: {err}", granularity.as_str());
            return GranularityOutcome::Skipped(format!("feature table unavailable: {err}"));
        }
    };

    match hybrid::train_hybrid(&table, settings) {
        Ok(Some(outcome)) => {
            if let Err(err) = persist_models(settings, &outcome) {
                tracing::error!("Failed to persist {} models: {err}", granularity.as_str());
            }
            GranularityOutcome::Completed(outcome.metrics)
        }
        Ok(None) => GranularityOutcome::Skipped("empty training or test partition".to_string()),
        Err(err) => {
            tracing::error!("Hybrid training failed for {}: {err}", granularity.as_str());
            GranularityOutcome::Skipped(err)
        }
    }
}

fn persist_models(
    settings: &PipelineSettings,
    outcome: &HybridOutcome,
) -> Result<(), PipelineError> {
    let dir = settings.paths.models_dir();
    let tag = format!("hibrido_{}", outcome.granularity.as_str());
    write_json(&dir.join(format!("{tag}_encoder.json")), &outcome.encoder)?;
    write_json(&dir.join(format!("{tag}_regressor.json")), &outcome.regressor)?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| PipelineError::WriteArtifact {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, bytes).map_err(|source| PipelineError::WriteArtifact {
        path: path.to_path_buf(),
        source,
    })
}

/// Run every stage in order against one settings value.
pub fn run_all(settings: &PipelineSettings) -> Result<PipelineSummary, PipelineError> {
    run_prepare(settings)?;
    run_master(settings)?;
    run_features(settings)?;
    run_train(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_map_keys_follow_the_model_identifier_convention() {
        let summary = PipelineSummary {
            entries: vec![
                (
                    Granularity::Daily,
                    GranularityOutcome::Completed(RegressionMetrics { r2: 0.5, rmse: 4.2 }),
                ),
                (
                    Granularity::Monthly,
                    GranularityOutcome::Skipped("empty training or test partition".to_string()),
                ),
                (
                    Granularity::Annual,
                    GranularityOutcome::Completed(RegressionMetrics { r2: 0.7, rmse: 3.1 }),
                ),
            ],
        };
        let map = summary.results_map();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("hibrido_diario"));
        assert!(map.contains_key("hibrido_anual"));
        assert!(!map.contains_key("hibrido_mensal"));
    }
}
