//! Agronomic feature engineering over the master tables.
//!
//! Derives growing-degree-days and vapor-pressure deficit, daily rolling
//! accumulations and stress-day counts, interaction and polynomial terms,
//! and prior-season lags. Input tables are never mutated; the engine works
//! on a copy and returns an enriched table at the same granularity.
//!
//! Rolling windows are order-dependent, so callers must sort rows by
//! municipality, season and time (`MasterTable::sort_rows`) before invoking
//! the engine.

use std::collections::BTreeMap;
use std::path::Path;

use crate::master::{Granularity, MasterRow, MasterRowParser, MasterTable, master_headers, master_record};
use crate::season::SeasonLabel;
use crate::settings::AgroThresholds;
use crate::tables::io::{self, TableError, coerce_number, fmt_cell};

pub mod rolling;

/// Column labels for the derived features, as emitted in the feature CSVs.
pub mod labels {
    pub const GDD: &str = "GDD";
    pub const VPD: &str = "VPD";
    pub const HEAT_FLAG: &str = "Heat_Stress_Flag";
    pub const DRY_FLAG: &str = "Dry_Day_Flag";
    pub const HEAT_STRESS_30: &str = "Heat_Stress_30d";
    pub const DRY_DAYS_30: &str = "Dry_Days_30d";
    pub const RAIN_ACC_30: &str = "Chuva_Acum_30d";
    pub const RAIN_ACC_60: &str = "Chuva_Acum_60d";
    pub const RAIN_ACC_90: &str = "Chuva_Acum_90d";
    pub const GDD_ACC_30: &str = "GDD_Acum_30d";
    pub const GDD_ACC_60: &str = "GDD_Acum_60d";
    pub const GDD_ACC_90: &str = "GDD_Acum_90d";
    pub const NDVI_X_RADIATION: &str = "NDVI_x_RS";
    pub const NDVI_X_RAIN_90: &str = "NDVI_x_Chuva_90d";
    pub const NDVI_X_GDD_90: &str = "NDVI_x_GDD_90d";
    pub const NDVI_SQ: &str = "NDVI_Quadrado";
    pub const TMED_SQ: &str = "Tmed_Quadrado";
    pub const OPTIMAL_TEMP_DEV: &str = "Desvio_Temp_Otima";
    pub const PREV_RAIN_TOTAL: &str = "Chuva_Total_Safra_Anterior";
    pub const PREV_NDVI_MEAN: &str = "NDVI_Medio_Safra_Anterior";
}

/// A master row augmented with derived features.
///
/// Window-based fields are `None` at monthly and annual grain, and at daily
/// positions that have not yet observed the minimum number of periods. Lag
/// fields are `None` for each municipality's first observed season.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub base: MasterRow,
    pub gdd: f64,
    pub vpd: f64,
    pub heat_flag: Option<u8>,
    pub dry_flag: Option<u8>,
    pub rain_acc_30: Option<f64>,
    pub rain_acc_60: Option<f64>,
    pub rain_acc_90: Option<f64>,
    pub gdd_acc_30: Option<f64>,
    pub gdd_acc_60: Option<f64>,
    pub gdd_acc_90: Option<f64>,
    pub heat_stress_30: Option<f64>,
    pub dry_days_30: Option<f64>,
    pub ndvi_x_radiation: f64,
    pub ndvi_x_rain_90: Option<f64>,
    pub ndvi_x_gdd_90: Option<f64>,
    pub ndvi_sq: f64,
    pub tmed_sq: f64,
    pub optimal_temp_dev: f64,
    pub prev_rain_total: Option<f64>,
    pub prev_ndvi_mean: Option<f64>,
}

/// A feature table at one granularity.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub granularity: Granularity,
    pub rows: Vec<FeatureRow>,
}

/// Growing-degree-days: daily mean temperature above the base, floored at
/// zero, no upper cap.
fn growing_degree_days(tmax_c: f64, tmin_c: f64, base_c: f64) -> f64 {
    let tmean = (tmax_c + tmin_c) / 2.0;
    if tmean.is_finite() {
        (tmean - base_c).max(0.0)
    } else {
        f64::NAN
    }
}

/// Vapor-pressure deficit from mean temperature and relative humidity,
/// via the Tetens saturation-pressure curve.
fn vapor_pressure_deficit(tmed_c: f64, humidity_pct: f64) -> f64 {
    let es = 0.6108 * ((17.27 * tmed_c) / (tmed_c + 237.3)).exp();
    let vpd = es * (1.0 - humidity_pct / 100.0);
    if vpd.is_finite() { vpd.max(0.0) } else { f64::NAN }
}

/// Derive the full feature set for one master table.
pub fn engineer_features(table: &MasterTable, thresholds: &AgroThresholds) -> FeatureTable {
    let granularity = table.granularity;
    let is_daily = granularity == Granularity::Daily;
    tracing::info!(
        "Engineering features for the {} table ({} rows)",
        granularity.as_str(),
        table.rows.len()
    );

    let mut rows: Vec<FeatureRow> = table
        .rows
        .iter()
        .map(|base| {
            let mut base = base.clone();
            let mut gdd = growing_degree_days(base.tmax_c, base.tmin_c, thresholds.gdd_base_c);
            let vpd = vapor_pressure_deficit(base.tmed_c, base.humidity_pct);
            if is_daily {
                // Fill gaps so rolling sums stay defined across the window.
                if !base.rain_mm.is_finite() {
                    base.rain_mm = 0.0;
                }
                if !gdd.is_finite() {
                    gdd = 0.0;
                }
                if !base.tmax_c.is_finite() {
                    base.tmax_c = base.tmed_c;
                }
            }
            let ndvi = base.ndvi;
            let tmed = base.tmed_c;
            FeatureRow {
                gdd,
                vpd,
                heat_flag: is_daily.then(|| u8::from(base.tmax_c > thresholds.heat_stress_max_c)),
                dry_flag: is_daily.then(|| u8::from(base.rain_mm < thresholds.dry_day_mm)),
                rain_acc_30: None,
                rain_acc_60: None,
                rain_acc_90: None,
                gdd_acc_30: None,
                gdd_acc_60: None,
                gdd_acc_90: None,
                heat_stress_30: None,
                dry_days_30: None,
                ndvi_x_radiation: ndvi * base.radiation_mj_m2,
                ndvi_x_rain_90: None,
                ndvi_x_gdd_90: None,
                ndvi_sq: ndvi * ndvi,
                tmed_sq: tmed * tmed,
                optimal_temp_dev: (tmed - thresholds.optimal_temp_c).powi(2),
                prev_rain_total: None,
                prev_ndvi_mean: None,
                base,
            }
        })
        .collect();

    if is_daily {
        apply_window_features(&mut rows, thresholds);
    }

    attach_lag_features(&mut rows, &table.rows);

    FeatureTable { granularity, rows }
}

/// Rolling accumulations and stress counts over contiguous
/// municipality-season runs of the sorted daily rows.
fn apply_window_features(rows: &mut [FeatureRow], thresholds: &AgroThresholds) {
    let [short, mid, long] = thresholds.accumulation_windows;
    let stress = thresholds.stress_window;

    let mut start = 0;
    while start < rows.len() {
        let mut end = start + 1;
        while end < rows.len()
            && rows[end].base.municipality == rows[start].base.municipality
            && rows[end].base.season == rows[start].base.season
        {
            end += 1;
        }
        let group = &mut rows[start..end];

        let rain: Vec<f64> = group.iter().map(|r| r.base.rain_mm).collect();
        let gdd: Vec<f64> = group.iter().map(|r| r.gdd).collect();
        let heat: Vec<f64> = group
            .iter()
            .map(|r| f64::from(r.heat_flag.unwrap_or(0)))
            .collect();
        let dry: Vec<f64> = group
            .iter()
            .map(|r| f64::from(r.dry_flag.unwrap_or(0)))
            .collect();

        let rain_30 = rolling::rolling_sum(&rain, short, short / 2);
        let rain_60 = rolling::rolling_sum(&rain, mid, mid / 2);
        let rain_90 = rolling::rolling_sum(&rain, long, long / 2);
        let gdd_30 = rolling::rolling_sum(&gdd, short, short / 2);
        let gdd_60 = rolling::rolling_sum(&gdd, mid, mid / 2);
        let gdd_90 = rolling::rolling_sum(&gdd, long, long / 2);
        let heat_30 = rolling::rolling_sum(&heat, stress, stress / 2);
        let dry_30 = rolling::rolling_sum(&dry, stress, stress / 2);

        for (i, row) in group.iter_mut().enumerate() {
            row.rain_acc_30 = rain_30[i];
            row.rain_acc_60 = rain_60[i];
            row.rain_acc_90 = rain_90[i];
            row.gdd_acc_30 = gdd_30[i];
            row.gdd_acc_60 = gdd_60[i];
            row.gdd_acc_90 = gdd_90[i];
            row.heat_stress_30 = heat_30[i];
            row.dry_days_30 = dry_30[i];
            let ndvi = row.base.ndvi;
            row.ndvi_x_rain_90 = rain_90[i].map(|v| ndvi * v);
            row.ndvi_x_gdd_90 = gdd_90[i].map(|v| ndvi * v);
        }

        start = end;
    }
}

/// Season-level aggregates shifted by one season within each municipality
/// and joined back onto the feature rows.
fn attach_lag_features(rows: &mut [FeatureRow], original: &[MasterRow]) {
    #[derive(Default)]
    struct SeasonAcc {
        rain_sum: f64,
        ndvi_sum: f64,
        ndvi_count: usize,
    }

    let mut by_season: BTreeMap<(String, SeasonLabel), SeasonAcc> = BTreeMap::new();
    for row in original {
        let acc = by_season
            .entry((row.municipality.clone(), row.season.clone()))
            .or_default();
        if row.rain_mm.is_finite() {
            acc.rain_sum += row.rain_mm;
        }
        if row.ndvi.is_finite() {
            acc.ndvi_sum += row.ndvi;
            acc.ndvi_count += 1;
        }
    }

    // BTreeMap order is (municipality, season); the zero-padded labels make
    // the string sort chronological, so a shift of one within each
    // municipality is the previous season.
    let mut lags: BTreeMap<(String, SeasonLabel), (f64, f64)> = BTreeMap::new();
    let mut prev: Option<(String, f64, f64)> = None;
    for ((municipality, season), acc) in &by_season {
        let ndvi_mean = if acc.ndvi_count == 0 {
            f64::NAN
        } else {
            acc.ndvi_sum / acc.ndvi_count as f64
        };
        if let Some((prev_muni, prev_rain, prev_ndvi)) = &prev {
            if prev_muni == municipality {
                lags.insert(
                    (municipality.clone(), season.clone()),
                    (*prev_rain, *prev_ndvi),
                );
            }
        }
        prev = Some((municipality.clone(), acc.rain_sum, ndvi_mean));
    }

    for row in rows {
        if let Some(&(rain, ndvi)) =
            lags.get(&(row.base.municipality.clone(), row.base.season.clone()))
        {
            row.prev_rain_total = Some(rain);
            row.prev_ndvi_mean = if ndvi.is_finite() { Some(ndvi) } else { None };
        }
    }
}

fn feature_headers(granularity: Granularity) -> Vec<&'static str> {
    let mut headers = master_headers(granularity);
    headers.extend([labels::GDD, labels::VPD]);
    if granularity == Granularity::Daily {
        headers.extend([
            labels::HEAT_FLAG,
            labels::DRY_FLAG,
            labels::RAIN_ACC_30,
            labels::RAIN_ACC_60,
            labels::RAIN_ACC_90,
            labels::GDD_ACC_30,
            labels::GDD_ACC_60,
            labels::GDD_ACC_90,
            labels::HEAT_STRESS_30,
            labels::DRY_DAYS_30,
        ]);
    }
    headers.push(labels::NDVI_X_RADIATION);
    if granularity == Granularity::Daily {
        headers.extend([labels::NDVI_X_RAIN_90, labels::NDVI_X_GDD_90]);
    }
    headers.extend([
        labels::NDVI_SQ,
        labels::TMED_SQ,
        labels::OPTIMAL_TEMP_DEV,
        labels::PREV_RAIN_TOTAL,
        labels::PREV_NDVI_MEAN,
    ]);
    headers
}

fn opt_cell(value: Option<f64>) -> String {
    value.map(fmt_cell).unwrap_or_default()
}

/// Write a feature table as CSV.
pub fn write_features(path: &Path, table: &FeatureTable) -> Result<(), TableError> {
    let mut writer = io::open_writer(path)?;
    let wrap = |err| TableError::from_csv(path, err);
    writer
        .write_record(feature_headers(table.granularity))
        .map_err(wrap)?;
    for row in &table.rows {
        let mut record = master_record(&row.base, table.granularity);
        record.push(fmt_cell(row.gdd));
        record.push(fmt_cell(row.vpd));
        if table.granularity == Granularity::Daily {
            record.push(row.heat_flag.map(|v| v.to_string()).unwrap_or_default());
            record.push(row.dry_flag.map(|v| v.to_string()).unwrap_or_default());
            record.push(opt_cell(row.rain_acc_30));
            record.push(opt_cell(row.rain_acc_60));
            record.push(opt_cell(row.rain_acc_90));
            record.push(opt_cell(row.gdd_acc_30));
            record.push(opt_cell(row.gdd_acc_60));
            record.push(opt_cell(row.gdd_acc_90));
            record.push(opt_cell(row.heat_stress_30));
            record.push(opt_cell(row.dry_days_30));
        }
        record.push(fmt_cell(row.ndvi_x_radiation));
        if table.granularity == Granularity::Daily {
            record.push(opt_cell(row.ndvi_x_rain_90));
            record.push(opt_cell(row.ndvi_x_gdd_90));
        }
        record.push(fmt_cell(row.ndvi_sq));
        record.push(fmt_cell(row.tmed_sq));
        record.push(fmt_cell(row.optimal_temp_dev));
        record.push(opt_cell(row.prev_rain_total));
        record.push(opt_cell(row.prev_ndvi_mean));
        writer.write_record(&record).map_err(wrap)?;
    }
    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a feature table back from CSV at the given granularity.
pub fn read_features(path: &Path, granularity: Granularity) -> Result<FeatureTable, TableError> {
    let mut reader = io::open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|err| TableError::from_csv(path, err))?
        .clone();
    let parser = MasterRowParser::new(path, &headers, granularity)?;
    let feature_only: Vec<&'static str> = feature_headers(granularity)
        .into_iter()
        .filter(|name| !master_headers(granularity).contains(name))
        .collect();
    let idx = io::resolve_headers(path, &headers, &feature_only)?;
    let by_name: BTreeMap<&str, usize> = feature_only.into_iter().zip(idx).collect();

    let opt = |record: &csv::StringRecord, name: &str| -> Option<f64> {
        let raw = by_name.get(name).and_then(|&i| record.get(i))?;
        coerce_number(raw).filter(|v| v.is_finite())
    };
    let num = |record: &csv::StringRecord, name: &str| -> f64 {
        opt(record, name).unwrap_or(f64::NAN)
    };

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|err| TableError::from_csv(path, err))?;
        let Some(base) = parser.parse(&record) else {
            dropped += 1;
            continue;
        };
        let daily = granularity == Granularity::Daily;
        rows.push(FeatureRow {
            base,
            gdd: num(&record, labels::GDD),
            vpd: num(&record, labels::VPD),
            heat_flag: daily
                .then(|| opt(&record, labels::HEAT_FLAG).map(|v| v as u8))
                .flatten(),
            dry_flag: daily
                .then(|| opt(&record, labels::DRY_FLAG).map(|v| v as u8))
                .flatten(),
            rain_acc_30: opt(&record, labels::RAIN_ACC_30),
            rain_acc_60: opt(&record, labels::RAIN_ACC_60),
            rain_acc_90: opt(&record, labels::RAIN_ACC_90),
            gdd_acc_30: opt(&record, labels::GDD_ACC_30),
            gdd_acc_60: opt(&record, labels::GDD_ACC_60),
            gdd_acc_90: opt(&record, labels::GDD_ACC_90),
            heat_stress_30: opt(&record, labels::HEAT_STRESS_30),
            dry_days_30: opt(&record, labels::DRY_DAYS_30),
            ndvi_x_radiation: num(&record, labels::NDVI_X_RADIATION),
            ndvi_x_rain_90: opt(&record, labels::NDVI_X_RAIN_90),
            ndvi_x_gdd_90: opt(&record, labels::NDVI_X_GDD_90),
            ndvi_sq: num(&record, labels::NDVI_SQ),
            tmed_sq: num(&record, labels::TMED_SQ),
            optimal_temp_dev: num(&record, labels::OPTIMAL_TEMP_DEV),
            prev_rain_total: opt(&record, labels::PREV_RAIN_TOTAL),
            prev_ndvi_mean: opt(&record, labels::PREV_NDVI_MEAN),
        });
    }
    if dropped > 0 {
        tracing::warn!(
            "Dropped {dropped} malformed feature rows from {}",
            path.display()
        );
    }
    Ok(FeatureTable { granularity, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn daily_row(municipality: &str, season: &str, date: time::Date, rain: f64) -> MasterRow {
        MasterRow {
            municipality: municipality.to_string(),
            season: SeasonLabel::parse(season).unwrap(),
            date: Some(date),
            year: Some(date.year()),
            month: Some(u8::from(date.month())),
            region: "Centro".to_string(),
            soil: None,
            tmax_c: 30.0,
            tmin_c: 18.0,
            tmed_c: 24.0,
            humidity_pct: 70.0,
            wind_ms: 2.0,
            radiation_mj_m2: 22.0,
            rain_mm: rain,
            ndvi: 0.7,
            area_total_ha: 50.0,
            production_ton: 100.0,
            yield_sc_ha: 33.33,
        }
    }

    fn daily_table(days: usize) -> MasterTable {
        let first = date!(2022 - 10 - 01);
        let rows = (0..days)
            .map(|i| {
                daily_row(
                    "Imbaú",
                    "22/23",
                    first + time::Duration::days(i as i64),
                    2.0,
                )
            })
            .collect();
        MasterTable {
            granularity: Granularity::Daily,
            rows,
        }
    }

    #[test]
    fn gdd_is_floored_at_zero() {
        assert_eq!(growing_degree_days(30.0, 18.0, 10.0), 14.0);
        assert_eq!(growing_degree_days(12.0, 4.0, 10.0), 0.0);
        assert!(growing_degree_days(f64::NAN, 18.0, 10.0).is_nan());
    }

    #[test]
    fn vpd_matches_tetens_reference() {
        // At 24 °C: es = 0.6108 * exp(17.27*24 / 261.3) ≈ 2.9829 kPa.
        let vpd = vapor_pressure_deficit(24.0, 70.0);
        assert!((vpd - 2.9829 * 0.3).abs() < 1e-3);
        // Saturated air has no deficit.
        assert_eq!(vapor_pressure_deficit(24.0, 100.0), 0.0);
    }

    #[test]
    fn accumulations_wait_for_half_the_window() {
        let table = daily_table(40);
        let features = engineer_features(&table, &AgroThresholds::default());

        // 30-day rainfall needs 15 observed periods.
        assert!(features.rows[13].rain_acc_30.is_none());
        assert_eq!(features.rows[14].rain_acc_30, Some(30.0));
        // 90-day needs 45, more than this group has.
        assert!(features.rows.iter().all(|r| r.rain_acc_90.is_none()));
        // Interactions with the 90-day window stay undefined with it.
        assert!(features.rows.iter().all(|r| r.ndvi_x_rain_90.is_none()));
    }

    #[test]
    fn windows_do_not_cross_season_boundaries() {
        let mut rows = daily_table(20).rows;
        let first = date!(2023 - 10 - 01);
        for i in 0..20 {
            rows.push(daily_row(
                "Imbaú",
                "23/24",
                first + time::Duration::days(i as i64),
                2.0,
            ));
        }
        let mut table = MasterTable {
            granularity: Granularity::Daily,
            rows,
        };
        table.sort_rows();
        let features = engineer_features(&table, &AgroThresholds::default());

        // The second season restarts the window; its 15th row is the first
        // defined accumulation even though 34 rows precede it globally.
        assert!(features.rows[20 + 13].rain_acc_30.is_none());
        assert_eq!(features.rows[20 + 14].rain_acc_30, Some(30.0));
    }

    #[test]
    fn stress_counts_count_flagged_days() {
        let mut table = daily_table(30);
        for (i, row) in table.rows.iter_mut().enumerate() {
            if i % 2 == 0 {
                row.tmax_c = 36.0; // heat stress
                row.rain_mm = 0.0; // dry day
            }
        }
        let features = engineer_features(&table, &AgroThresholds::default());
        assert_eq!(features.rows[0].heat_flag, Some(1));
        assert_eq!(features.rows[1].heat_flag, Some(0));
        // 15 of the first 15 positions alternate starting flagged: 8 flagged.
        assert_eq!(features.rows[14].heat_stress_30, Some(8.0));
        assert_eq!(features.rows[14].dry_days_30, Some(8.0));
        assert_eq!(features.rows[29].heat_stress_30, Some(15.0));
    }

    #[test]
    fn missing_rain_and_tmax_are_filled_before_windowing() {
        let mut table = daily_table(30);
        table.rows[0].rain_mm = f64::NAN;
        table.rows[1].tmax_c = f64::NAN;
        let features = engineer_features(&table, &AgroThresholds::default());

        // NaN rain counts as zero in the accumulation and flags as dry.
        assert_eq!(features.rows[0].dry_flag, Some(1));
        assert_eq!(features.rows[14].rain_acc_30, Some(28.0));
        // NaN Tmax falls back to Tmed, below the stress threshold.
        assert_eq!(features.rows[1].heat_flag, Some(0));
        assert_eq!(features.rows[1].base.tmax_c, 24.0);
    }

    #[test]
    fn first_season_has_no_lags_and_second_matches_first_totals() {
        let mut rows = daily_table(10).rows;
        let first = date!(2023 - 10 - 01);
        for i in 0..10 {
            rows.push(daily_row(
                "Imbaú",
                "23/24",
                first + time::Duration::days(i as i64),
                5.0,
            ));
        }
        let mut table = MasterTable {
            granularity: Granularity::Daily,
            rows,
        };
        table.sort_rows();
        let features = engineer_features(&table, &AgroThresholds::default());

        let first_season: Vec<&FeatureRow> = features
            .rows
            .iter()
            .filter(|r| r.base.season.as_str() == "22/23")
            .collect();
        let second_season: Vec<&FeatureRow> = features
            .rows
            .iter()
            .filter(|r| r.base.season.as_str() == "23/24")
            .collect();

        assert!(first_season.iter().all(|r| r.prev_rain_total.is_none()));
        assert!(first_season.iter().all(|r| r.prev_ndvi_mean.is_none()));
        // 10 days at 2 mm in the first season.
        assert!(second_season.iter().all(|r| r.prev_rain_total == Some(20.0)));
        assert!(
            second_season
                .iter()
                .all(|r| (r.prev_ndvi_mean.unwrap() - 0.7).abs() < 1e-9)
        );
    }

    #[test]
    fn lags_do_not_cross_municipalities() {
        let mut rows = Vec::new();
        for (muni, season, start) in [
            ("Antonina", "22/23", date!(2022 - 10 - 01)),
            ("Imbaú", "23/24", date!(2023 - 10 - 01)),
        ] {
            for i in 0..5 {
                rows.push(daily_row(muni, season, start + time::Duration::days(i), 1.0));
            }
        }
        let mut table = MasterTable {
            granularity: Granularity::Daily,
            rows,
        };
        table.sort_rows();
        let features = engineer_features(&table, &AgroThresholds::default());
        // Imbaú's first observed season must not inherit Antonina's totals.
        assert!(features.rows.iter().all(|r| r.prev_rain_total.is_none()));
    }

    #[test]
    fn non_daily_tables_skip_window_features_but_keep_the_rest() {
        let annual_base = MasterRow {
            date: None,
            year: None,
            month: None,
            ..daily_row("Imbaú", "22/23", date!(2022 - 10 - 01), 100.0)
        };
        let table = MasterTable {
            granularity: Granularity::Annual,
            rows: vec![annual_base],
        };
        let features = engineer_features(&table, &AgroThresholds::default());
        let row = &features.rows[0];
        assert!(row.rain_acc_30.is_none());
        assert!(row.heat_flag.is_none());
        assert!(row.ndvi_x_rain_90.is_none());
        assert_eq!(row.gdd, 14.0);
        assert!((row.ndvi_x_radiation - 0.7 * 22.0).abs() < 1e-12);
        assert!((row.optimal_temp_dev - 0.0).abs() < 1e-12);
        assert!((row.ndvi_sq - 0.49).abs() < 1e-12);
    }

    #[test]
    fn feature_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features_diario.csv");
        let table = daily_table(40);
        let features = engineer_features(&table, &AgroThresholds::default());
        write_features(&path, &features).unwrap();

        let back = read_features(&path, Granularity::Daily).unwrap();
        assert_eq!(back.rows.len(), 40);
        assert!(back.rows[13].rain_acc_30.is_none());
        assert_eq!(back.rows[14].rain_acc_30, Some(30.0));
        assert_eq!(back.rows[0].heat_flag, Some(0));
        assert_eq!(back.rows[39].gdd, 14.0);
    }
}
