//! Typed catalogue of the model's input columns.
//!
//! The temporal feature set depends on the table's granularity: window-based
//! features only exist at daily grain. Enumerating the columns here replaces
//! runtime header probing; the scaler, sequence builder and report all
//! iterate the same list.

use crate::features::{FeatureRow, labels};
use crate::master::Granularity;
use crate::tables::columns as table_columns;

/// A temporal (per-observation) feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureColumn {
    Tmax,
    Tmin,
    Tmed,
    Humidity,
    Wind,
    Radiation,
    Rain,
    Ndvi,
    Gdd,
    Vpd,
    HeatStress30,
    DryDays30,
    RainAcc30,
    RainAcc60,
    RainAcc90,
    GddAcc30,
    GddAcc60,
    GddAcc90,
    NdviXRadiation,
    NdviXRain90,
    NdviXGdd90,
    NdviSq,
    TmedSq,
    OptimalTempDev,
    PrevRainTotal,
    PrevNdviMean,
}

impl FeatureColumn {
    /// Column label as emitted in the feature CSVs.
    pub fn label(self) -> &'static str {
        match self {
            FeatureColumn::Tmax => table_columns::TMAX,
            FeatureColumn::Tmin => table_columns::TMIN,
            FeatureColumn::Tmed => table_columns::TMED,
            FeatureColumn::Humidity => table_columns::HUMIDITY,
            FeatureColumn::Wind => table_columns::WIND,
            FeatureColumn::Radiation => table_columns::RADIATION,
            FeatureColumn::Rain => table_columns::RAIN,
            FeatureColumn::Ndvi => table_columns::NDVI,
            FeatureColumn::Gdd => labels::GDD,
            FeatureColumn::Vpd => labels::VPD,
            FeatureColumn::HeatStress30 => labels::HEAT_STRESS_30,
            FeatureColumn::DryDays30 => labels::DRY_DAYS_30,
            FeatureColumn::RainAcc30 => labels::RAIN_ACC_30,
            FeatureColumn::RainAcc60 => labels::RAIN_ACC_60,
            FeatureColumn::RainAcc90 => labels::RAIN_ACC_90,
            FeatureColumn::GddAcc30 => labels::GDD_ACC_30,
            FeatureColumn::GddAcc60 => labels::GDD_ACC_60,
            FeatureColumn::GddAcc90 => labels::GDD_ACC_90,
            FeatureColumn::NdviXRadiation => labels::NDVI_X_RADIATION,
            FeatureColumn::NdviXRain90 => labels::NDVI_X_RAIN_90,
            FeatureColumn::NdviXGdd90 => labels::NDVI_X_GDD_90,
            FeatureColumn::NdviSq => labels::NDVI_SQ,
            FeatureColumn::TmedSq => labels::TMED_SQ,
            FeatureColumn::OptimalTempDev => labels::OPTIMAL_TEMP_DEV,
            FeatureColumn::PrevRainTotal => labels::PREV_RAIN_TOTAL,
            FeatureColumn::PrevNdviMean => labels::PREV_NDVI_MEAN,
        }
    }

    /// Extract the column's value from a row; `None` when undefined there.
    pub fn value(self, row: &FeatureRow) -> Option<f64> {
        let value = match self {
            FeatureColumn::Tmax => Some(row.base.tmax_c),
            FeatureColumn::Tmin => Some(row.base.tmin_c),
            FeatureColumn::Tmed => Some(row.base.tmed_c),
            FeatureColumn::Humidity => Some(row.base.humidity_pct),
            FeatureColumn::Wind => Some(row.base.wind_ms),
            FeatureColumn::Radiation => Some(row.base.radiation_mj_m2),
            FeatureColumn::Rain => Some(row.base.rain_mm),
            FeatureColumn::Ndvi => Some(row.base.ndvi),
            FeatureColumn::Gdd => Some(row.gdd),
            FeatureColumn::Vpd => Some(row.vpd),
            FeatureColumn::HeatStress30 => row.heat_stress_30,
            FeatureColumn::DryDays30 => row.dry_days_30,
            FeatureColumn::RainAcc30 => row.rain_acc_30,
            FeatureColumn::RainAcc60 => row.rain_acc_60,
            FeatureColumn::RainAcc90 => row.rain_acc_90,
            FeatureColumn::GddAcc30 => row.gdd_acc_30,
            FeatureColumn::GddAcc60 => row.gdd_acc_60,
            FeatureColumn::GddAcc90 => row.gdd_acc_90,
            FeatureColumn::NdviXRadiation => Some(row.ndvi_x_radiation),
            FeatureColumn::NdviXRain90 => row.ndvi_x_rain_90,
            FeatureColumn::NdviXGdd90 => row.ndvi_x_gdd_90,
            FeatureColumn::NdviSq => Some(row.ndvi_sq),
            FeatureColumn::TmedSq => Some(row.tmed_sq),
            FeatureColumn::OptimalTempDev => Some(row.optimal_temp_dev),
            FeatureColumn::PrevRainTotal => row.prev_rain_total,
            FeatureColumn::PrevNdviMean => row.prev_ndvi_mean,
        };
        value.filter(|v| v.is_finite())
    }

    /// The temporal columns available at a granularity, in model order.
    pub fn for_granularity(granularity: Granularity) -> Vec<FeatureColumn> {
        let mut columns = vec![
            FeatureColumn::Tmax,
            FeatureColumn::Tmin,
            FeatureColumn::Tmed,
            FeatureColumn::Humidity,
            FeatureColumn::Wind,
            FeatureColumn::Radiation,
            FeatureColumn::Rain,
            FeatureColumn::Ndvi,
            FeatureColumn::Gdd,
            FeatureColumn::Vpd,
        ];
        if granularity == Granularity::Daily {
            columns.extend([
                FeatureColumn::HeatStress30,
                FeatureColumn::DryDays30,
                FeatureColumn::RainAcc30,
                FeatureColumn::RainAcc60,
                FeatureColumn::RainAcc90,
                FeatureColumn::GddAcc30,
                FeatureColumn::GddAcc60,
                FeatureColumn::GddAcc90,
            ]);
        }
        columns.push(FeatureColumn::NdviXRadiation);
        if granularity == Granularity::Daily {
            columns.extend([FeatureColumn::NdviXRain90, FeatureColumn::NdviXGdd90]);
        }
        columns.extend([
            FeatureColumn::NdviSq,
            FeatureColumn::TmedSq,
            FeatureColumn::OptimalTempDev,
            FeatureColumn::PrevRainTotal,
            FeatureColumn::PrevNdviMean,
        ]);
        columns
    }
}

/// A static categorical column fed to the regressor as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticColumn {
    Soil,
    Region,
    Municipality,
}

impl StaticColumn {
    /// Resolve a configured column name.
    pub fn parse(name: &str) -> Option<StaticColumn> {
        match name {
            table_columns::SOIL => Some(StaticColumn::Soil),
            table_columns::REGION => Some(StaticColumn::Region),
            table_columns::MUNICIPALITY => Some(StaticColumn::Municipality),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StaticColumn::Soil => table_columns::SOIL,
            StaticColumn::Region => table_columns::REGION,
            StaticColumn::Municipality => table_columns::MUNICIPALITY,
        }
    }

    /// The column's categorical value for a row.
    pub fn value(self, row: &FeatureRow) -> String {
        match self {
            StaticColumn::Soil => row.base.soil.clone().unwrap_or_default(),
            StaticColumn::Region => row.base.region.clone(),
            StaticColumn::Municipality => row.base.municipality.clone(),
        }
    }
}
