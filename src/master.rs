//! Master dataset assembly: join climate, NDVI and yield into one daily
//! table, then re-aggregate to monthly and season level.
//!
//! NDVI is pre-aggregated to one value per municipality-month before the
//! join so multiple observations in a month cannot fan out the daily rows.
//! Rows that cannot be matched to an NDVI month or a yield season are
//! dropped, never imputed. Aggregation follows per-variable policies:
//! climate means, rainfall sums, NDVI means, and season-constant yield
//! figures carried through unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::season::SeasonLabel;
use crate::tables::columns;
use crate::tables::io::{
    self, TableError, coerce_number, find_header, fmt_cell, fmt_date, parse_date, resolve_headers,
};
use crate::tables::{ClimateDay, NdviObservation, YieldSeason};

/// Time grain of a master or feature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Monthly,
    Annual,
}

impl Granularity {
    /// Identifier used in artifact file names and result keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Daily => "diario",
            Granularity::Monthly => "mensal",
            Granularity::Annual => "anual",
        }
    }

    pub fn all() -> [Granularity; 3] {
        [Granularity::Daily, Granularity::Monthly, Granularity::Annual]
    }
}

/// One observation of the joined master dataset.
///
/// `date` is present only at daily grain; `year`/`month` at daily and
/// monthly grain. Climate variables may be `NaN` (blank upstream cells);
/// NDVI and the yield figures are always finite by construction.
#[derive(Debug, Clone)]
pub struct MasterRow {
    pub municipality: String,
    pub season: SeasonLabel,
    pub date: Option<Date>,
    pub year: Option<i32>,
    pub month: Option<u8>,
    pub region: String,
    pub soil: Option<String>,
    pub tmax_c: f64,
    pub tmin_c: f64,
    pub tmed_c: f64,
    pub humidity_pct: f64,
    pub wind_ms: f64,
    pub radiation_mj_m2: f64,
    pub rain_mm: f64,
    pub ndvi: f64,
    pub area_total_ha: f64,
    pub production_ton: f64,
    pub yield_sc_ha: f64,
}

/// A master table at one granularity.
#[derive(Debug, Clone)]
pub struct MasterTable {
    pub granularity: Granularity,
    pub rows: Vec<MasterRow>,
}

impl MasterTable {
    /// Sort rows by municipality, season and time. Rolling-window features
    /// require this order; the pipeline establishes it before the feature
    /// engine runs.
    pub fn sort_rows(&mut self) {
        self.rows.sort_by(|a, b| {
            (&a.municipality, &a.season, a.date, a.year, a.month).cmp(&(
                &b.municipality,
                &b.season,
                b.date,
                b.year,
                b.month,
            ))
        });
    }
}

/// Build the daily master table from the three cleaned inputs.
///
/// All inputs are filtered to the allow-listed municipalities by exact name
/// match. Region and soil come from the yield table, the authoritative
/// season-level source.
pub fn build_daily(
    climate: &[ClimateDay],
    ndvi: &[NdviObservation],
    yields: &[YieldSeason],
    municipalities: &[String],
) -> MasterTable {
    let allowed: BTreeSet<&str> = municipalities.iter().map(String::as_str).collect();

    let climate: Vec<&ClimateDay> = climate
        .iter()
        .filter(|row| allowed.contains(row.municipality.as_str()))
        .collect();
    let ndvi: Vec<&NdviObservation> = ndvi
        .iter()
        .filter(|row| allowed.contains(row.municipality.as_str()))
        .collect();
    let yields: Vec<&YieldSeason> = yields
        .iter()
        .filter(|row| allowed.contains(row.municipality.as_str()))
        .collect();
    tracing::info!(
        "Municipality filter kept climate: {}, NDVI: {}, yield: {} rows",
        climate.len(),
        ndvi.len(),
        yields.len()
    );

    // One NDVI value per municipality-month, averaged over all observations
    // in that month. Mandatory before the join to avoid fan-out duplication.
    let mut ndvi_monthly: BTreeMap<(String, SeasonLabel, i32, u8), (f64, usize)> = BTreeMap::new();
    for obs in &ndvi {
        let season = SeasonLabel::from_date(obs.date);
        let key = (
            obs.municipality.clone(),
            season,
            obs.date.year(),
            u8::from(obs.date.month()),
        );
        let entry = ndvi_monthly.entry(key).or_insert((0.0, 0));
        entry.0 += obs.value;
        entry.1 += 1;
    }

    let mut yield_by_season: BTreeMap<(String, SeasonLabel), &YieldSeason> = BTreeMap::new();
    for &record in &yields {
        yield_by_season
            .entry((record.municipality.clone(), record.season.clone()))
            .or_insert(record);
    }

    let mut rows = Vec::new();
    for day in &climate {
        let season = SeasonLabel::from_date(day.date);
        let year = day.date.year();
        let month = u8::from(day.date.month());
        // Left joins followed by the drop policy: a row survives only with
        // both an NDVI month and a yield season behind it.
        let Some(&(ndvi_sum, ndvi_count)) =
            ndvi_monthly.get(&(day.municipality.clone(), season.clone(), year, month))
        else {
            continue;
        };
        let Some(season_yield) = yield_by_season.get(&(day.municipality.clone(), season.clone()))
        else {
            continue;
        };
        rows.push(MasterRow {
            municipality: day.municipality.clone(),
            season,
            date: Some(day.date),
            year: Some(year),
            month: Some(month),
            region: season_yield.region.clone(),
            soil: season_yield.soil.clone(),
            tmax_c: day.tmax_c,
            tmin_c: day.tmin_c,
            tmed_c: day.tmed_c,
            humidity_pct: day.humidity_pct,
            wind_ms: day.wind_ms,
            radiation_mj_m2: day.radiation_mj_m2,
            rain_mm: day.rain_mm,
            ndvi: ndvi_sum / ndvi_count as f64,
            area_total_ha: season_yield.area_total_ha,
            production_ton: season_yield.production_ton,
            yield_sc_ha: season_yield.yield_sc_ha,
        });
    }

    if rows.is_empty() {
        tracing::warn!("Daily master join produced zero rows; downstream tables will be empty");
    } else {
        tracing::info!("Daily master table built with {} rows", rows.len());
    }
    MasterTable {
        granularity: Granularity::Daily,
        rows,
    }
}

/// Re-aggregate the daily master table to monthly grain.
pub fn aggregate_monthly(daily: &MasterTable) -> MasterTable {
    aggregate(daily, Granularity::Monthly)
}

/// Re-aggregate the daily master table to season grain.
pub fn aggregate_annual(daily: &MasterTable) -> MasterTable {
    aggregate(daily, Granularity::Annual)
}

type GroupKey = (
    String,
    SeasonLabel,
    Option<i32>,
    Option<u8>,
    String,
    Option<String>,
);

#[derive(Default)]
struct GroupAcc {
    tmax: MeanAcc,
    tmin: MeanAcc,
    tmed: MeanAcc,
    humidity: MeanAcc,
    wind: MeanAcc,
    radiation: MeanAcc,
    rain_sum: f64,
    ndvi: MeanAcc,
    first: Option<(f64, f64, f64)>,
}

/// Running mean that skips non-finite values, matching how the source
/// tables treat blank cells under aggregation.
#[derive(Default)]
struct MeanAcc {
    sum: f64,
    count: usize,
}

impl MeanAcc {
    fn push(&mut self, value: f64) {
        if value.is_finite() {
            self.sum += value;
            self.count += 1;
        }
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }
}

fn aggregate(daily: &MasterTable, granularity: Granularity) -> MasterTable {
    let mut groups: BTreeMap<GroupKey, GroupAcc> = BTreeMap::new();
    for row in &daily.rows {
        let (year, month) = match granularity {
            Granularity::Monthly => (row.year, row.month),
            _ => (None, None),
        };
        let key = (
            row.municipality.clone(),
            row.season.clone(),
            year,
            month,
            row.region.clone(),
            row.soil.clone(),
        );
        let acc = groups.entry(key).or_default();
        acc.tmax.push(row.tmax_c);
        acc.tmin.push(row.tmin_c);
        acc.tmed.push(row.tmed_c);
        acc.humidity.push(row.humidity_pct);
        acc.wind.push(row.wind_ms);
        acc.radiation.push(row.radiation_mj_m2);
        if row.rain_mm.is_finite() {
            acc.rain_sum += row.rain_mm;
        }
        acc.ndvi.push(row.ndvi);
        acc.first
            .get_or_insert((row.area_total_ha, row.production_ton, row.yield_sc_ha));
    }

    let rows = groups
        .into_iter()
        .map(|((municipality, season, year, month, region, soil), acc)| {
            let (area_total_ha, production_ton, yield_sc_ha) =
                acc.first.unwrap_or((f64::NAN, f64::NAN, f64::NAN));
            MasterRow {
                municipality,
                season,
                date: None,
                year,
                month,
                region,
                soil,
                tmax_c: acc.tmax.mean(),
                tmin_c: acc.tmin.mean(),
                tmed_c: acc.tmed.mean(),
                humidity_pct: acc.humidity.mean(),
                wind_ms: acc.wind.mean(),
                radiation_mj_m2: acc.radiation.mean(),
                rain_mm: acc.rain_sum,
                ndvi: acc.ndvi.mean(),
                area_total_ha,
                production_ton,
                yield_sc_ha,
            }
        })
        .collect();

    MasterTable { granularity, rows }
}

pub(crate) fn master_headers(granularity: Granularity) -> Vec<&'static str> {
    let mut headers = vec![columns::MUNICIPALITY, columns::SEASON];
    if granularity == Granularity::Daily {
        headers.push(columns::NDVI_DATE);
    }
    if granularity != Granularity::Annual {
        headers.push(columns::YEAR);
        headers.push(columns::MONTH);
    }
    headers.extend([
        columns::REGION,
        columns::SOIL,
        columns::TMAX,
        columns::TMIN,
        columns::TMED,
        columns::HUMIDITY,
        columns::WIND,
        columns::RADIATION,
        columns::RAIN,
        columns::NDVI,
        columns::AREA_TOTAL,
        columns::PRODUCTION,
        columns::YIELD,
    ]);
    headers
}

/// Serialize one master row in `master_headers` order.
pub(crate) fn master_record(row: &MasterRow, granularity: Granularity) -> Vec<String> {
    let mut record = vec![row.municipality.clone(), row.season.as_str().to_string()];
    if granularity == Granularity::Daily {
        record.push(row.date.map(fmt_date).unwrap_or_default());
    }
    if granularity != Granularity::Annual {
        record.push(row.year.map(|y| y.to_string()).unwrap_or_default());
        record.push(row.month.map(|m| m.to_string()).unwrap_or_default());
    }
    record.extend([
        row.region.clone(),
        row.soil.clone().unwrap_or_default(),
        fmt_cell(row.tmax_c),
        fmt_cell(row.tmin_c),
        fmt_cell(row.tmed_c),
        fmt_cell(row.humidity_pct),
        fmt_cell(row.wind_ms),
        fmt_cell(row.radiation_mj_m2),
        fmt_cell(row.rain_mm),
        fmt_cell(row.ndvi),
        fmt_cell(row.area_total_ha),
        fmt_cell(row.production_ton),
        fmt_cell(row.yield_sc_ha),
    ]);
    record
}

/// Write a master table as CSV.
pub fn write_master(path: &Path, table: &MasterTable) -> Result<(), TableError> {
    let mut writer = io::open_writer(path)?;
    let wrap = |err| TableError::from_csv(path, err);
    writer
        .write_record(master_headers(table.granularity))
        .map_err(wrap)?;
    for row in &table.rows {
        writer
            .write_record(master_record(row, table.granularity))
            .map_err(wrap)?;
    }
    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Column positions for parsing master rows out of a CSV record.
pub(crate) struct MasterRowParser {
    granularity: Granularity,
    by_name: BTreeMap<&'static str, usize>,
    soil_idx: Option<usize>,
}

impl MasterRowParser {
    pub(crate) fn new(
        path: &Path,
        headers: &csv::StringRecord,
        granularity: Granularity,
    ) -> Result<Self, TableError> {
        let required = master_headers(granularity);
        let idx = resolve_headers(path, headers, &required)?;
        let by_name = required.into_iter().zip(idx).collect();
        Ok(Self {
            granularity,
            by_name,
            soil_idx: find_header(headers, columns::SOIL),
        })
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> &'r str {
        self.by_name
            .get(name)
            .and_then(|&i| record.get(i))
            .unwrap_or("")
    }

    fn num(&self, record: &csv::StringRecord, name: &str) -> f64 {
        coerce_number(self.get(record, name)).unwrap_or(f64::NAN)
    }

    /// Parse one row; `None` means the row is malformed and must be dropped.
    pub(crate) fn parse(&self, record: &csv::StringRecord) -> Option<MasterRow> {
        let season = SeasonLabel::parse(self.get(record, columns::SEASON).trim())?;
        let date = if self.granularity == Granularity::Daily {
            Some(parse_date(self.get(record, columns::NDVI_DATE))?)
        } else {
            None
        };
        let (year, month) = if self.granularity != Granularity::Annual {
            let year = self.get(record, columns::YEAR).trim().parse::<i32>().ok()?;
            let month = self.get(record, columns::MONTH).trim().parse::<u8>().ok()?;
            (Some(year), Some(month))
        } else {
            (None, None)
        };
        let soil = self
            .soil_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        Some(MasterRow {
            municipality: self.get(record, columns::MUNICIPALITY).trim().to_string(),
            season,
            date,
            year,
            month,
            region: self.get(record, columns::REGION).trim().to_string(),
            soil,
            tmax_c: self.num(record, columns::TMAX),
            tmin_c: self.num(record, columns::TMIN),
            tmed_c: self.num(record, columns::TMED),
            humidity_pct: self.num(record, columns::HUMIDITY),
            wind_ms: self.num(record, columns::WIND),
            radiation_mj_m2: self.num(record, columns::RADIATION),
            rain_mm: self.num(record, columns::RAIN),
            ndvi: self.num(record, columns::NDVI),
            area_total_ha: self.num(record, columns::AREA_TOTAL),
            production_ton: self.num(record, columns::PRODUCTION),
            yield_sc_ha: self.num(record, columns::YIELD),
        })
    }
}

/// Read a master table back from CSV at the given granularity.
pub fn read_master(path: &Path, granularity: Granularity) -> Result<MasterTable, TableError> {
    let mut reader = io::open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|err| TableError::from_csv(path, err))?
        .clone();
    let parser = MasterRowParser::new(path, &headers, granularity)?;

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|err| TableError::from_csv(path, err))?;
        match parser.parse(&record) {
            Some(row) => rows.push(row),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::warn!(
            "Dropped {dropped} malformed master rows from {}",
            path.display()
        );
    }
    Ok(MasterTable { granularity, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn climate_day(municipality: &str, date: Date, rain: f64) -> ClimateDay {
        ClimateDay {
            municipality: municipality.to_string(),
            date,
            tmax_c: 30.0,
            tmin_c: 18.0,
            tmed_c: 24.0,
            humidity_pct: 70.0,
            wind_ms: 2.0,
            radiation_mj_m2: 22.0,
            rain_mm: rain,
        }
    }

    fn ndvi_obs(municipality: &str, date: Date, value: f64) -> NdviObservation {
        NdviObservation {
            municipality: municipality.to_string(),
            date,
            value,
        }
    }

    fn season_yield(municipality: &str, season: &str) -> YieldSeason {
        YieldSeason {
            municipality: municipality.to_string(),
            season: SeasonLabel::parse(season).unwrap(),
            region: "Centro".to_string(),
            soil: Some("LVdf".to_string()),
            area_total_ha: 50.0,
            production_ton: 100.0,
            yield_sc_ha: 33.33,
        }
    }

    fn allow(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn full_coverage_join_loses_no_rows() {
        let climate: Vec<ClimateDay> = (1..=10)
            .map(|day| climate_day("Imbaú", date!(2022 - 10 - 01).replace_day(day).unwrap(), 1.0))
            .collect();
        let ndvi = vec![ndvi_obs("Imbaú", date!(2022 - 10 - 05), 0.7)];
        let yields = vec![season_yield("Imbaú", "22/23")];

        let table = build_daily(&climate, &ndvi, &yields, &allow(&["Imbaú"]));
        assert_eq!(table.rows.len(), 10);
        assert!(table.rows.iter().all(|r| r.ndvi == 0.7));
        assert!(table.rows.iter().all(|r| r.yield_sc_ha == 33.33));
        assert!(table.rows.iter().all(|r| r.region == "Centro"));
    }

    #[test]
    fn multiple_ndvi_observations_average_instead_of_fanning_out() {
        let climate = vec![climate_day("Imbaú", date!(2022 - 10 - 01), 0.0)];
        let ndvi = vec![
            ndvi_obs("Imbaú", date!(2022 - 10 - 03), 0.6),
            ndvi_obs("Imbaú", date!(2022 - 10 - 19), 0.8),
        ];
        let yields = vec![season_yield("Imbaú", "22/23")];

        let table = build_daily(&climate, &ndvi, &yields, &allow(&["Imbaú"]));
        assert_eq!(table.rows.len(), 1);
        assert!((table.rows[0].ndvi - 0.7).abs() < 1e-12);
    }

    #[test]
    fn rows_without_ndvi_or_yield_are_dropped() {
        let climate = vec![
            climate_day("Imbaú", date!(2022 - 10 - 01), 0.0),
            climate_day("Imbaú", date!(2022 - 11 - 01), 0.0),
            climate_day("Antonina", date!(2022 - 10 - 01), 0.0),
        ];
        // November has no NDVI observation; Antonina has no yield record.
        let ndvi = vec![
            ndvi_obs("Imbaú", date!(2022 - 10 - 05), 0.7),
            ndvi_obs("Antonina", date!(2022 - 10 - 05), 0.6),
        ];
        let yields = vec![season_yield("Imbaú", "22/23")];

        let table = build_daily(&climate, &ndvi, &yields, &allow(&["Imbaú", "Antonina"]));
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].municipality, "Imbaú");
    }

    #[test]
    fn no_municipality_overlap_yields_empty_table() {
        let climate = vec![climate_day("Curitiba", date!(2022 - 10 - 01), 0.0)];
        let ndvi = vec![ndvi_obs("Curitiba", date!(2022 - 10 - 05), 0.7)];
        let yields = vec![season_yield("Curitiba", "22/23")];

        let table = build_daily(&climate, &ndvi, &yields, &allow(&["Imbaú"]));
        assert!(table.rows.is_empty());
    }

    #[test]
    fn monthly_rainfall_sums_match_daily_totals() {
        let mut climate = Vec::new();
        for day in 1..=20 {
            climate.push(climate_day(
                "Imbaú",
                date!(2022 - 10 - 01).replace_day(day).unwrap(),
                day as f64,
            ));
        }
        for day in 1..=10 {
            climate.push(climate_day(
                "Imbaú",
                date!(2022 - 11 - 01).replace_day(day).unwrap(),
                2.0,
            ));
        }
        let ndvi = vec![
            ndvi_obs("Imbaú", date!(2022 - 10 - 05), 0.7),
            ndvi_obs("Imbaú", date!(2022 - 11 - 05), 0.8),
        ];
        let yields = vec![season_yield("Imbaú", "22/23")];

        let daily = build_daily(&climate, &ndvi, &yields, &allow(&["Imbaú"]));
        let monthly = aggregate_monthly(&daily);
        assert_eq!(monthly.rows.len(), 2);

        let daily_total: f64 = daily.rows.iter().map(|r| r.rain_mm).sum();
        let monthly_total: f64 = monthly.rows.iter().map(|r| r.rain_mm).sum();
        assert!((daily_total - monthly_total).abs() < 1e-9);

        // October: 1 + 2 + ... + 20 = 210.
        let october = monthly
            .rows
            .iter()
            .find(|r| r.month == Some(10))
            .expect("october row");
        assert!((october.rain_mm - 210.0).abs() < 1e-9);
        assert_eq!(october.yield_sc_ha, 33.33);
    }

    #[test]
    fn annual_aggregation_keeps_one_row_per_municipality_season() {
        let mut climate = Vec::new();
        for (muni, month) in [("Imbaú", 10u8), ("Imbaú", 11), ("Antonina", 10)] {
            for day in 1..=5 {
                let d = Date::from_calendar_date(2022, time::Month::try_from(month).unwrap(), day)
                    .unwrap();
                climate.push(climate_day(muni, d, 1.0));
            }
        }
        let ndvi = vec![
            ndvi_obs("Imbaú", date!(2022 - 10 - 05), 0.7),
            ndvi_obs("Imbaú", date!(2022 - 11 - 05), 0.8),
            ndvi_obs("Antonina", date!(2022 - 10 - 05), 0.6),
        ];
        let yields = vec![season_yield("Imbaú", "22/23"), season_yield("Antonina", "22/23")];

        let daily = build_daily(&climate, &ndvi, &yields, &allow(&["Imbaú", "Antonina"]));
        let annual = aggregate_annual(&daily);
        assert_eq!(annual.rows.len(), 2);
        assert!(annual.rows.iter().all(|r| r.year.is_none() && r.month.is_none()));
        assert!(annual.rows.iter().all(|r| r.yield_sc_ha == 33.33));
    }

    #[test]
    fn nan_climate_cells_are_skipped_by_means_not_sums() {
        let mut climate = vec![
            climate_day("Imbaú", date!(2022 - 10 - 01), 4.0),
            climate_day("Imbaú", date!(2022 - 10 - 02), f64::NAN),
        ];
        climate[1].tmax_c = f64::NAN;
        let ndvi = vec![ndvi_obs("Imbaú", date!(2022 - 10 - 05), 0.7)];
        let yields = vec![season_yield("Imbaú", "22/23")];

        let daily = build_daily(&climate, &ndvi, &yields, &allow(&["Imbaú"]));
        let monthly = aggregate_monthly(&daily);
        assert_eq!(monthly.rows.len(), 1);
        // Mean over the single finite Tmax; rain sum ignores the NaN day.
        assert_eq!(monthly.rows[0].tmax_c, 30.0);
        assert_eq!(monthly.rows[0].rain_mm, 4.0);
    }

    #[test]
    fn master_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master_diario.csv");
        let climate = vec![climate_day("Imbaú", date!(2022 - 10 - 01), 3.5)];
        let ndvi = vec![ndvi_obs("Imbaú", date!(2022 - 10 - 05), 0.7)];
        let yields = vec![season_yield("Imbaú", "22/23")];
        let table = build_daily(&climate, &ndvi, &yields, &allow(&["Imbaú"]));

        write_master(&path, &table).unwrap();
        let back = read_master(&path, Granularity::Daily).unwrap();
        assert_eq!(back.rows.len(), 1);
        assert_eq!(back.rows[0].date, Some(date!(2022 - 10 - 01)));
        assert_eq!(back.rows[0].rain_mm, 3.5);
        assert_eq!(back.rows[0].soil.as_deref(), Some("LVdf"));
    }
}
