//! Fixed-length sequence tensors per municipality-season group.
//!
//! Each group's rows, already scaled and in chronological order, become one
//! `max_timesteps x n_features` matrix: truncated when the season has more
//! rows, zero-padded at the tail when it has fewer. The group's scalar
//! target is its season yield; a metadata record carries the identifying
//! keys, static categorical values and the held-out-season flag.

use std::collections::BTreeMap;

use crate::features::FeatureTable;
use crate::ml::columns::StaticColumn;
use crate::season::SeasonLabel;

/// Identifying and static data for one sequence.
#[derive(Debug, Clone)]
pub struct SequenceMeta {
    pub municipality: String,
    pub season: SeasonLabel,
    /// True iff the season equals the configured held-out test season.
    pub is_test: bool,
    pub area_total_ha: f64,
    pub production_ton: f64,
    /// Values of the configured static columns, in column order.
    pub statics: Vec<String>,
}

/// Sequences, targets and metadata for one granularity.
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    pub max_timesteps: usize,
    pub n_features: usize,
    /// Row-major `[timestep][feature]` matrices, one per group.
    pub sequences: Vec<Vec<f32>>,
    pub targets: Vec<f32>,
    pub meta: Vec<SequenceMeta>,
}

impl SequenceDataset {
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Indices of the training (non-held-out) groups.
    pub fn train_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| !self.meta[i].is_test).collect()
    }

    /// Indices of the held-out groups.
    pub fn test_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.meta[i].is_test).collect()
    }
}

/// Build the sequence dataset from a feature table and its scaled temporal
/// rows (one `Vec<f32>` per table row, aligned by index).
pub fn build_sequences(
    table: &FeatureTable,
    scaled_rows: &[Vec<f32>],
    max_timesteps: usize,
    test_season: &SeasonLabel,
    static_columns: &[StaticColumn],
) -> SequenceDataset {
    let n_features = scaled_rows.first().map(Vec::len).unwrap_or(0);

    // Group row indices by key; rows arrive sorted, so each group's indices
    // stay in chronological order.
    let mut groups: BTreeMap<(String, SeasonLabel), Vec<usize>> = BTreeMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        groups
            .entry((row.base.municipality.clone(), row.base.season.clone()))
            .or_default()
            .push(i);
    }

    let mut sequences = Vec::with_capacity(groups.len());
    let mut targets = Vec::with_capacity(groups.len());
    let mut meta = Vec::with_capacity(groups.len());
    for ((municipality, season), indices) in groups {
        let mut matrix = vec![0.0f32; max_timesteps * n_features];
        for (t, &row_idx) in indices.iter().take(max_timesteps).enumerate() {
            matrix[t * n_features..(t + 1) * n_features].copy_from_slice(&scaled_rows[row_idx]);
        }
        let first = &table.rows[indices[0]];
        sequences.push(matrix);
        targets.push(first.base.yield_sc_ha as f32);
        meta.push(SequenceMeta {
            is_test: season == *test_season,
            municipality,
            season,
            area_total_ha: first.base.area_total_ha,
            production_ton: first.base.production_ton,
            statics: static_columns
                .iter()
                .map(|column| column.value(first))
                .collect(),
        });
    }

    SequenceDataset {
        max_timesteps,
        n_features,
        sequences,
        targets,
        meta,
    }
}
