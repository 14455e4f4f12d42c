//! Record structs for the three cleaned input tables.

use time::Date;

use crate::season::SeasonLabel;

/// One municipality-day of climate observations, restricted to season months.
///
/// Climate variables may be `NaN` when the upstream station had no reading
/// for that day; downstream aggregation skips non-finite values the same way
/// the source tables treat blank cells.
#[derive(Debug, Clone)]
pub struct ClimateDay {
    pub municipality: String,
    pub date: Date,
    pub tmax_c: f64,
    pub tmin_c: f64,
    pub tmed_c: f64,
    pub humidity_pct: f64,
    pub wind_ms: f64,
    pub radiation_mj_m2: f64,
    pub rain_mm: f64,
}

/// One NDVI observation; roughly monthly per municipality, with gaps.
#[derive(Debug, Clone)]
pub struct NdviObservation {
    pub municipality: String,
    pub date: Date,
    pub value: f64,
}

/// One municipality-season of production figures.
#[derive(Debug, Clone)]
pub struct YieldSeason {
    pub municipality: String,
    pub season: SeasonLabel,
    pub region: String,
    /// Soil classification; absent from some source extracts.
    pub soil: Option<String>,
    pub area_total_ha: f64,
    pub production_ton: f64,
    /// Sacks (60 kg) per hectare, rounded to 2 decimals.
    pub yield_sc_ha: f64,
}

impl YieldSeason {
    /// Productivity in 60 kg sacks per hectare, rounded to 2 decimals.
    pub fn compute_yield(production_ton: f64, area_total_ha: f64) -> f64 {
        let sacks = production_ton * (1000.0 / 60.0);
        (sacks / area_total_ha * 100.0).round() / 100.0
    }
}
