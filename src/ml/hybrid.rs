//! Hybrid trainer: sequences → encoder embeddings → boosted regressor.
//!
//! Mirrors the two-phase design: the recurrent encoder is trained on the
//! training seasons to predict yield directly, then reused as a feature
//! extractor whose embedding, concatenated with integer-coded categorical
//! statics, feeds the tuned gradient-boosted regressor. Evaluation happens
//! once, on the held-out season.

use std::collections::BTreeMap;

use crate::features::FeatureTable;
use crate::master::Granularity;
use crate::ml::columns::{FeatureColumn, StaticColumn};
use crate::ml::encoder::{self, EncoderModel};
use crate::ml::gbdt::{self, GbdtRegressor, SearchOptions, SearchSpace};
use crate::ml::metrics::RegressionMetrics;
use crate::ml::scaling::MinMaxScaler;
use crate::ml::sequence::{self, SequenceDataset};
use crate::settings::{PipelineSettings, SequenceShape};

/// Outcome of one granularity's hybrid run.
#[derive(Debug, Clone)]
pub struct HybridOutcome {
    pub granularity: Granularity,
    pub metrics: RegressionMetrics,
    pub encoder: EncoderModel,
    pub regressor: GbdtRegressor,
    pub regressor_options: gbdt::TrainOptions,
    pub train_groups: usize,
    pub test_groups: usize,
}

/// Train and evaluate the hybrid model for one feature table.
///
/// Returns `Ok(None)` when the training or test partition is empty for this
/// granularity; the caller logs and moves on to its siblings.
pub fn train_hybrid(
    table: &FeatureTable,
    settings: &PipelineSettings,
) -> Result<Option<HybridOutcome>, String> {
    let granularity = table.granularity;
    tracing::info!(
        "--- Hybrid training for the {} granularity ---",
        granularity.as_str()
    );
    if table.rows.is_empty() {
        tracing::warn!("Feature table is empty; skipping this granularity");
        return Ok(None);
    }

    let shape = shape_for(settings, granularity);
    let columns = FeatureColumn::for_granularity(granularity);
    tracing::info!(
        "Using {} temporal features: {:?}",
        columns.len(),
        columns.iter().map(|c| c.label()).collect::<Vec<_>>()
    );

    // Missing values become zero before scaling, so padded and absent
    // entries are indistinguishable from the scaler's point of view.
    let mut rows: Vec<Vec<f32>> = table
        .rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| column.value(row).unwrap_or(0.0) as f32)
                .collect()
        })
        .collect();

    let test_season = settings.test_season_label();
    let scaler = if settings.scale_on_train_only {
        let is_train: Vec<bool> = table
            .rows
            .iter()
            .map(|row| row.base.season != test_season)
            .collect();
        MinMaxScaler::fit_where(&rows, columns.len(), |i| is_train[i])
    } else {
        MinMaxScaler::fit(&rows, columns.len())
    };
    for row in &mut rows {
        scaler.transform(row);
    }

    let static_columns = resolve_static_columns(&settings.static_features);
    let dataset = sequence::build_sequences(
        table,
        &rows,
        shape.max_timesteps,
        &test_season,
        &static_columns,
    );
    tracing::info!(
        "Built {} sequences of {} timesteps x {} features",
        dataset.len(),
        dataset.max_timesteps,
        dataset.n_features
    );

    let train_indices = dataset.train_indices();
    if train_indices.is_empty() {
        tracing::warn!("No training sequences for this granularity; skipping");
        return Ok(None);
    }

    let encoder = train_encoder_stage(&dataset, &train_indices, shape, settings)?;
    let embeddings: Vec<Vec<f32>> = dataset.sequences.iter().map(|seq| encoder.embed(seq)).collect();

    let test_indices = dataset.test_indices();
    if test_indices.is_empty() {
        tracing::warn!(
            "Held-out season {} is absent at this granularity; skipping evaluation",
            test_season
        );
        return Ok(None);
    }

    let static_codes = encode_statics(&dataset, static_columns.len());
    let feature_len = settings.encoder.embedding_size + static_columns.len();
    let assemble = |i: usize| -> Vec<f32> {
        let mut row = embeddings[i].clone();
        row.extend(static_codes[i].iter().copied());
        row
    };

    let train_dataset = gbdt::TrainDataset {
        feature_len,
        x: train_indices.iter().map(|&i| assemble(i)).collect(),
        y: train_indices.iter().map(|&i| dataset.targets[i]).collect(),
    };

    let search = SearchOptions {
        space: SearchSpace {
            rounds: settings.regressor.rounds.clone(),
            learning_rate: settings.regressor.learning_rate.clone(),
            bins: settings.regressor.bins.clone(),
            subsample: settings.regressor.subsample.clone(),
        },
        iterations: settings.regressor.search_iterations,
        folds: settings.regressor.cv_folds,
        seed: settings.regressor.seed,
    };
    let (regressor, regressor_options) = gbdt::randomized_search(&train_dataset, &search)?;

    let truth: Vec<f32> = test_indices.iter().map(|&i| dataset.targets[i]).collect();
    let predicted: Vec<f32> = test_indices
        .iter()
        .map(|&i| regressor.predict(&assemble(i)))
        .collect();
    let metrics = RegressionMetrics::from_predictions(&truth, &predicted);
    tracing::info!(
        "Results for {} (hybrid): R² = {:.4}, RMSE = {:.4} sc/ha",
        granularity.as_str(),
        metrics.r2,
        metrics.rmse
    );

    Ok(Some(HybridOutcome {
        granularity,
        metrics,
        encoder,
        regressor,
        regressor_options,
        train_groups: train_indices.len(),
        test_groups: test_indices.len(),
    }))
}

fn shape_for(settings: &PipelineSettings, granularity: Granularity) -> &SequenceShape {
    match granularity {
        Granularity::Daily => &settings.encoder.daily,
        Granularity::Monthly => &settings.encoder.monthly,
        Granularity::Annual => &settings.encoder.annual,
    }
}

fn resolve_static_columns(names: &[String]) -> Vec<StaticColumn> {
    let mut columns = Vec::new();
    for name in names {
        match StaticColumn::parse(name) {
            Some(column) => columns.push(column),
            None => tracing::warn!("Unknown static feature column {name:?}; ignoring"),
        }
    }
    columns
}

fn train_encoder_stage(
    dataset: &SequenceDataset,
    train_indices: &[usize],
    shape: &SequenceShape,
    settings: &PipelineSettings,
) -> Result<EncoderModel, String> {
    let train_sequences: Vec<Vec<f32>> = train_indices
        .iter()
        .map(|&i| dataset.sequences[i].clone())
        .collect();
    let train_targets: Vec<f32> = train_indices.iter().map(|&i| dataset.targets[i]).collect();

    let options = encoder::TrainOptions {
        units: shape.units,
        bidirectional: shape.bidirectional,
        dropout: shape.dropout,
        embedding_size: settings.encoder.embedding_size,
        epochs: settings.encoder.epochs,
        batch_size: settings.encoder.batch_size,
        patience: settings.encoder.patience,
        learning_rate: settings.encoder.learning_rate,
        seed: settings.encoder.seed,
        ..encoder::TrainOptions::default()
    };
    encoder::train_encoder(
        &train_sequences,
        &train_targets,
        dataset.n_features,
        dataset.max_timesteps,
        &options,
    )
}

/// Integer-code each static column over all groups, in lexicographic value
/// order, so train and test share one deterministic code book.
fn encode_statics(dataset: &SequenceDataset, n_static: usize) -> Vec<Vec<f32>> {
    let mut values: Vec<std::collections::BTreeSet<&str>> = vec![Default::default(); n_static];
    for meta in &dataset.meta {
        for (j, value) in meta.statics.iter().enumerate() {
            values[j].insert(value.as_str());
        }
    }
    let sorted_books: Vec<BTreeMap<&str, usize>> = values
        .iter()
        .map(|set| {
            set.iter()
                .enumerate()
                .map(|(code, &value)| (value, code))
                .collect()
        })
        .collect();

    dataset
        .meta
        .iter()
        .map(|meta| {
            meta.statics
                .iter()
                .enumerate()
                .map(|(j, value)| sorted_books[j][value.as_str()] as f32)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::engineer_features;
    use crate::master::{MasterRow, MasterTable};
    use crate::season::SeasonLabel;
    use crate::settings::AgroThresholds;
    use time::macros::date;

    fn master_row(municipality: &str, season: &str, day_offset: i64, yield_sc_ha: f64) -> MasterRow {
        let start_year = 2000 + season[..2].parse::<i32>().unwrap();
        let date = time::Date::from_calendar_date(start_year, time::Month::October, 1).unwrap()
            + time::Duration::days(day_offset);
        MasterRow {
            municipality: municipality.to_string(),
            season: SeasonLabel::parse(season).unwrap(),
            date: Some(date),
            year: Some(date.year()),
            month: Some(u8::from(date.month())),
            region: "Centro".to_string(),
            soil: Some("LVdf".to_string()),
            tmax_c: 28.0 + day_offset as f64 * 0.1,
            tmin_c: 16.0,
            tmed_c: 22.0 + day_offset as f64 * 0.05,
            humidity_pct: 70.0,
            wind_ms: 2.0,
            radiation_mj_m2: 22.0,
            rain_mm: 2.0 + day_offset as f64 * 0.2,
            ndvi: 0.6 + 0.01 * day_offset as f64,
            area_total_ha: 50.0,
            production_ton: 100.0,
            yield_sc_ha,
        }
    }

    fn fixture_settings() -> PipelineSettings {
        let mut settings = PipelineSettings::default();
        settings.test_season = "23/24".to_string();
        settings.encoder.epochs = 5;
        settings.encoder.daily.units = 4;
        settings.encoder.embedding_size = 4;
        settings.regressor.search_iterations = 2;
        settings.regressor.cv_folds = 2;
        settings.regressor.rounds = vec![10];
        settings
    }

    fn fixture_table(seasons: &[&str]) -> FeatureTable {
        let mut rows = Vec::new();
        for (s, season) in seasons.iter().enumerate() {
            for muni in ["Imbaú", "Antonina"] {
                for day in 0..6 {
                    let mut row = master_row(muni, season, day, 30.0 + s as f64 * 3.0);
                    // Later seasons are wetter, so the held-out season widens
                    // the rainfall range a full-table scaler fit would see.
                    row.rain_mm += s as f64 * 5.0;
                    rows.push(row);
                }
            }
        }
        let mut table = MasterTable {
            granularity: Granularity::Daily,
            rows,
        };
        table.sort_rows();
        engineer_features(&table, &AgroThresholds::default())
    }

    #[test]
    fn trains_and_evaluates_when_both_partitions_exist() {
        let table = fixture_table(&["21/22", "22/23", "23/24"]);
        let settings = fixture_settings();
        let outcome = train_hybrid(&table, &settings).unwrap();
        let outcome = outcome.expect("should produce metrics");
        assert_eq!(outcome.train_groups, 4);
        assert_eq!(outcome.test_groups, 2);
        assert!(outcome.metrics.rmse.is_finite());
        assert!(outcome.encoder.validate().is_ok());
        assert!(outcome.regressor.validate().is_ok());
    }

    #[test]
    fn missing_test_season_skips_the_granularity() {
        let table = fixture_table(&["21/22", "22/23"]);
        let settings = fixture_settings();
        assert!(train_hybrid(&table, &settings).unwrap().is_none());
    }

    #[test]
    fn all_test_rows_means_no_training_partition() {
        let table = fixture_table(&["23/24"]);
        let settings = fixture_settings();
        assert!(train_hybrid(&table, &settings).unwrap().is_none());
    }

    #[test]
    fn leaking_and_train_only_scaling_disagree() {
        let table = fixture_table(&["21/22", "22/23", "23/24"]);
        let mut leaking = fixture_settings();
        leaking.scale_on_train_only = false;
        let mut safe = fixture_settings();
        safe.scale_on_train_only = true;

        let a = train_hybrid(&table, &leaking).unwrap().unwrap();
        let b = train_hybrid(&table, &safe).unwrap().unwrap();
        // The scaler sees different ranges, so the fitted encoders differ.
        assert_ne!(a.encoder.we, b.encoder.we);
    }

    #[test]
    fn static_codes_are_lexicographic_and_shared() {
        let table = fixture_table(&["22/23", "23/24"]);
        let settings = fixture_settings();
        let statics = resolve_static_columns(&settings.static_features);
        let dataset = sequence::build_sequences(
            &table,
            &vec![vec![0.5f32]; table.rows.len()],
            3,
            &settings.test_season_label(),
            &statics,
        );
        let codes = encode_statics(&dataset, statics.len());
        // municipio column: Antonina < Imbaú lexicographically.
        let muni_idx = 2;
        for (i, meta) in dataset.meta.iter().enumerate() {
            let expected = if meta.municipality == "Antonina" { 0.0 } else { 1.0 };
            assert_eq!(codes[i][muni_idx], expected);
        }
    }
}
