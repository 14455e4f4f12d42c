//! Pipeline configuration loaded from a TOML file.
//!
//! Every threshold and hyperparameter the pipeline stages consume lives here
//! so a run is fully described by one immutable value passed through the
//! stage entry points. Missing keys fall back to the defaults used for the
//! Paraná soy study.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::master::Granularity;
use crate::season::SeasonLabel;

/// Errors raised while loading or saving pipeline settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid test season label: {0:?}")]
    InvalidTestSeason(String),
}

/// Directories and file names for pipeline artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root for raw input files.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Cleaned per-source tables (stages 01-03).
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    /// Master tables (stage 04).
    #[serde(default = "default_master_dir")]
    pub master_dir: PathBuf,
    /// Feature tables (stage 05).
    #[serde(default = "default_features_dir")]
    pub features_dir: PathBuf,
    /// Metrics, models and logs (stage 06).
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            processed_dir: default_processed_dir(),
            master_dir: default_master_dir(),
            features_dir: default_features_dir(),
            results_dir: default_results_dir(),
        }
    }
}

impl DataPaths {
    pub fn raw_ndvi(&self) -> PathBuf {
        self.base_dir.join("NDVI_Municipios_unico.csv")
    }

    pub fn raw_yield(&self) -> PathBuf {
        self.base_dir.join("soja_por_ano_municipio_area.csv")
    }

    pub fn raw_climate(&self) -> PathBuf {
        self.base_dir.join("clima_PR_2000-2024_clean.csv")
    }

    pub fn processed_ndvi(&self) -> PathBuf {
        self.processed_dir.join("ndvi_filtrado.csv")
    }

    pub fn processed_yield(&self) -> PathBuf {
        self.processed_dir.join("yield_calculado.csv")
    }

    pub fn processed_climate(&self) -> PathBuf {
        self.processed_dir.join("clima_safra.csv")
    }

    pub fn master_table(&self, granularity: Granularity) -> PathBuf {
        self.master_dir
            .join(format!("master_{}.csv", granularity.as_str()))
    }

    pub fn feature_table(&self, granularity: Granularity) -> PathBuf {
        self.features_dir
            .join(format!("features_{}.csv", granularity.as_str()))
    }

    pub fn results_file(&self) -> PathBuf {
        self.results_dir.join("results.json")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.results_dir.join("models")
    }
}

/// Agronomic thresholds used by the feature engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgroThresholds {
    /// Base temperature for growing-degree-days, °C.
    #[serde(default = "default_gdd_base")]
    pub gdd_base_c: f64,
    /// Daily maximum above this counts as a heat-stress day, °C.
    #[serde(default = "default_heat_stress")]
    pub heat_stress_max_c: f64,
    /// Daily rainfall below this counts as a dry day, mm.
    #[serde(default = "default_dry_day")]
    pub dry_day_mm: f64,
    /// Optimal mean temperature for soy, °C.
    #[serde(default = "default_optimal_temp")]
    pub optimal_temp_c: f64,
    /// Trailing accumulation windows in periods, shortest first. The emitted
    /// column labels reflect the default 30/60/90-day contract and are not
    /// renamed when these are overridden.
    #[serde(default = "default_acc_windows")]
    pub accumulation_windows: [usize; 3],
    /// Window for the stress-day counts, in periods.
    #[serde(default = "default_stress_window")]
    pub stress_window: usize,
}

impl Default for AgroThresholds {
    fn default() -> Self {
        Self {
            gdd_base_c: default_gdd_base(),
            heat_stress_max_c: default_heat_stress(),
            dry_day_mm: default_dry_day(),
            optimal_temp_c: default_optimal_temp(),
            accumulation_windows: default_acc_windows(),
            stress_window: default_stress_window(),
        }
    }
}

/// Per-granularity sequence-encoder shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceShape {
    /// Fixed sequence length; shorter seasons are zero-padded, longer truncated.
    pub max_timesteps: usize,
    /// Recurrent state width. Zero selects the flatten-plus-dense encoder.
    pub units: usize,
    #[serde(default)]
    pub dropout: f32,
    #[serde(default)]
    pub bidirectional: bool,
}

/// Encoder training hyperparameters shared across granularities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSettings {
    #[serde(default = "default_daily_shape")]
    pub daily: SequenceShape,
    #[serde(default = "default_monthly_shape")]
    pub monthly: SequenceShape,
    #[serde(default = "default_annual_shape")]
    pub annual: SequenceShape,
    /// Width of the embedding bottleneck handed to the regressor.
    #[serde(default = "default_embedding_size")]
    pub embedding_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Early-stopping patience in epochs, on training loss.
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_encoder_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            daily: default_daily_shape(),
            monthly: default_monthly_shape(),
            annual: default_annual_shape(),
            embedding_size: default_embedding_size(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            patience: default_patience(),
            learning_rate: default_encoder_learning_rate(),
            seed: default_seed(),
        }
    }
}

/// Randomized-search space and budget for the boosted regressor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressorSettings {
    #[serde(default = "default_rounds_space")]
    pub rounds: Vec<usize>,
    #[serde(default = "default_lr_space")]
    pub learning_rate: Vec<f32>,
    #[serde(default = "default_bins_space")]
    pub bins: Vec<usize>,
    #[serde(default = "default_subsample_space")]
    pub subsample: Vec<f32>,
    /// Number of random configurations to evaluate.
    #[serde(default = "default_search_iterations")]
    pub search_iterations: usize,
    /// Cross-validation folds per configuration.
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for RegressorSettings {
    fn default() -> Self {
        Self {
            rounds: default_rounds_space(),
            learning_rate: default_lr_space(),
            bins: default_bins_space(),
            subsample: default_subsample_space(),
            search_iterations: default_search_iterations(),
            cv_folds: default_cv_folds(),
            seed: default_seed(),
        }
    }
}

/// Full pipeline configuration.
///
/// Config keys (TOML): `paths`, `municipalities`, `season_months`,
/// `test_season`, `target_column`, `static_features`, `scale_on_train_only`,
/// `thresholds`, `encoder`, `regressor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub paths: DataPaths,
    /// Exact-match allow-list of municipality display names.
    #[serde(default = "default_municipalities")]
    pub municipalities: Vec<String>,
    /// Calendar months that make up a season.
    #[serde(default = "default_season_months")]
    pub season_months: Vec<u8>,
    /// Season held out for evaluation, e.g. `"23/24"`.
    #[serde(default = "default_test_season")]
    pub test_season: String,
    /// Name of the target column in emitted tables.
    #[serde(default = "default_target_column")]
    pub target_column: String,
    /// Categorical columns fed to the regressor as integer codes.
    #[serde(default = "default_static_features")]
    pub static_features: Vec<String>,
    /// Fit the temporal scaler on training rows only instead of the full
    /// table. The full-table fit reproduces the original study, including its
    /// test-season information leak.
    #[serde(default)]
    pub scale_on_train_only: bool,
    #[serde(default)]
    pub thresholds: AgroThresholds,
    #[serde(default)]
    pub encoder: EncoderSettings,
    #[serde(default)]
    pub regressor: RegressorSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            paths: DataPaths::default(),
            municipalities: default_municipalities(),
            season_months: default_season_months(),
            test_season: default_test_season(),
            target_column: default_target_column(),
            static_features: default_static_features(),
            scale_on_train_only: false,
            thresholds: AgroThresholds::default(),
            encoder: EncoderSettings::default(),
            regressor: RegressorSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Load settings from a TOML file, falling back to defaults per key.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.normalized()
    }

    /// Write the settings to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate cross-field constraints and clamp out-of-range knobs.
    pub fn normalized(mut self) -> Result<Self, SettingsError> {
        if SeasonLabel::parse(&self.test_season).is_none() {
            return Err(SettingsError::InvalidTestSeason(self.test_season));
        }
        self.encoder.daily.dropout = self.encoder.daily.dropout.clamp(0.0, 0.9);
        self.encoder.monthly.dropout = self.encoder.monthly.dropout.clamp(0.0, 0.9);
        self.encoder.annual.dropout = self.encoder.annual.dropout.clamp(0.0, 0.9);
        self.encoder.embedding_size = self.encoder.embedding_size.max(1);
        self.encoder.batch_size = self.encoder.batch_size.max(1);
        self.regressor.cv_folds = self.regressor.cv_folds.max(2);
        self.regressor.search_iterations = self.regressor.search_iterations.max(1);
        Ok(self)
    }

    /// The held-out season as a validated label.
    pub fn test_season_label(&self) -> SeasonLabel {
        SeasonLabel::parse(&self.test_season).unwrap_or_else(|| {
            // normalized() rejects malformed labels before any stage runs.
            SeasonLabel::from_start_year(0)
        })
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("./data/processed")
}

fn default_master_dir() -> PathBuf {
    PathBuf::from("./data/master")
}

fn default_features_dir() -> PathBuf {
    PathBuf::from("./data/features")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_municipalities() -> Vec<String> {
    [
        "Lindoeste",
        "Bandeirantes",
        "Imbaú",
        "Antonina",
        "Pinhal de São Bento",
        "Nova Esperança do Sudoeste",
        "Campina do Simão",
        "Diamante do Norte",
        "Cruzeiro do Sul",
        "Wenceslau Braz",
        "Francisco Alves",
        "Moreira Sales",
        "Mato Rico",
        "Diamante do Sul",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_season_months() -> Vec<u8> {
    vec![9, 10, 11, 12, 1, 2, 3]
}

fn default_test_season() -> String {
    "23/24".to_string()
}

fn default_target_column() -> String {
    "YIELD_SC_HA".to_string()
}

fn default_static_features() -> Vec<String> {
    vec!["Solo".to_string(), "REGIAO".to_string(), "municipio".to_string()]
}

fn default_gdd_base() -> f64 {
    10.0
}

fn default_heat_stress() -> f64 {
    34.0
}

fn default_dry_day() -> f64 {
    1.0
}

fn default_optimal_temp() -> f64 {
    24.0
}

fn default_acc_windows() -> [usize; 3] {
    [30, 60, 90]
}

fn default_stress_window() -> usize {
    30
}

fn default_daily_shape() -> SequenceShape {
    SequenceShape {
        // Roughly seven months of daily rows.
        max_timesteps: 210,
        units: 64,
        dropout: 0.2,
        bidirectional: false,
    }
}

fn default_monthly_shape() -> SequenceShape {
    SequenceShape {
        max_timesteps: 7,
        units: 32,
        dropout: 0.1,
        bidirectional: true,
    }
}

fn default_annual_shape() -> SequenceShape {
    SequenceShape {
        max_timesteps: 1,
        units: 0,
        dropout: 0.0,
        bidirectional: false,
    }
}

fn default_embedding_size() -> usize {
    32
}

fn default_epochs() -> usize {
    100
}

fn default_batch_size() -> usize {
    16
}

fn default_patience() -> usize {
    15
}

fn default_encoder_learning_rate() -> f32 {
    0.005
}

fn default_seed() -> u64 {
    42
}

fn default_rounds_space() -> Vec<usize> {
    vec![100, 200, 300, 500]
}

fn default_lr_space() -> Vec<f32> {
    vec![0.01, 0.05, 0.1]
}

fn default_bins_space() -> Vec<usize> {
    vec![16, 32, 64]
}

fn default_subsample_space() -> Vec<f32> {
    vec![0.7, 0.8, 0.9, 1.0]
}

fn default_search_iterations() -> usize {
    25
}

fn default_cv_folds() -> usize {
    5
}
