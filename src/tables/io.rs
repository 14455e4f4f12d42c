//! CSV readers and writers for the cleaned tables.
//!
//! Columns are resolved by header name so the readers tolerate reordered or
//! extra columns. Numeric cells accept either `.` or `,` as the decimal
//! separator; blank cells become `NaN`, while malformed cells drop the row
//! (never the table) with a warning.

use std::path::{Path, PathBuf};

use thiserror::Error;
use time::{Date, format_description::FormatItem, macros::format_description};

use super::columns;
use super::records::{ClimateDay, NdviObservation, YieldSeason};
use crate::season::SeasonLabel;

pub(crate) const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Errors raised while reading or writing a table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("input table not found: {path}")]
    MissingInput { path: PathBuf },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("csv error on {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("missing required columns in {path}: {names:?}")]
    MissingColumns { path: PathBuf, names: Vec<String> },
}

impl TableError {
    pub(crate) fn from_csv(path: &Path, source: csv::Error) -> Self {
        if let csv::ErrorKind::Io(io_err) = source.kind() {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                return TableError::MissingInput {
                    path: path.to_path_buf(),
                };
            }
        }
        TableError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Resolve required header names to column positions, collecting every
/// missing name so schema violations are reported in one log entry.
pub(crate) fn resolve_headers(
    path: &Path,
    headers: &csv::StringRecord,
    required: &[&str],
) -> Result<Vec<usize>, TableError> {
    let mut positions = Vec::with_capacity(required.len());
    let mut missing = Vec::new();
    for &name in required {
        match headers.iter().position(|header| header == name) {
            Some(idx) => positions.push(idx),
            None => missing.push(name.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(TableError::MissingColumns {
            path: path.to_path_buf(),
            names: missing,
        });
    }
    Ok(positions)
}

pub(crate) fn find_header(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header == name)
}

/// Best-effort numeric coercion: blank cells become `NaN`, `,` decimals are
/// accepted, anything else unparseable is `None` (caller drops the row).
pub(crate) fn coerce_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return Some(f64::NAN);
    }
    cleaned.replace(',', ".").parse().ok()
}

pub(crate) fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), &DATE_FORMAT).ok()
}

/// Format a cell, writing blanks for non-finite values.
pub(crate) fn fmt_cell(value: f64) -> String {
    if value.is_finite() {
        format!("{value}")
    } else {
        String::new()
    }
}

pub(crate) fn fmt_date(date: Date) -> String {
    date.format(&DATE_FORMAT).unwrap_or_default()
}

pub(crate) fn create_parent_dirs(path: &Path) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| TableError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

pub(crate) fn open_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, TableError> {
    csv::Reader::from_path(path).map_err(|err| TableError::from_csv(path, err))
}

pub(crate) fn open_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, TableError> {
    create_parent_dirs(path)?;
    csv::Writer::from_path(path).map_err(|err| TableError::from_csv(path, err))
}

/// Read a cleaned daily climate table.
pub fn read_climate(path: &Path) -> Result<Vec<ClimateDay>, TableError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|err| TableError::from_csv(path, err))?
        .clone();
    let required = [
        columns::CLIMATE_DATE,
        columns::CLIMATE_MUNICIPALITY,
        columns::TMAX,
        columns::TMIN,
        columns::TMED,
        columns::HUMIDITY,
        columns::WIND,
        columns::RADIATION,
        columns::RAIN,
    ];
    let idx = resolve_headers(path, &headers, &required)?;

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|err| TableError::from_csv(path, err))?;
        let cell = |i: usize| record.get(idx[i]).unwrap_or("");
        let Some(date) = parse_date(cell(0)) else {
            dropped += 1;
            continue;
        };
        let values: Option<Vec<f64>> = (2..required.len()).map(|i| coerce_number(cell(i))).collect();
        let Some(values) = values else {
            dropped += 1;
            continue;
        };
        rows.push(ClimateDay {
            municipality: cell(1).trim().to_string(),
            date,
            tmax_c: values[0],
            tmin_c: values[1],
            tmed_c: values[2],
            humidity_pct: values[3],
            wind_ms: values[4],
            radiation_mj_m2: values[5],
            rain_mm: values[6],
        });
    }
    if dropped > 0 {
        tracing::warn!(
            "Dropped {dropped} climate rows with unparseable cells from {}",
            path.display()
        );
    }
    Ok(rows)
}

/// Read a cleaned NDVI observation table.
pub fn read_ndvi(path: &Path) -> Result<Vec<NdviObservation>, TableError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|err| TableError::from_csv(path, err))?
        .clone();
    let required = [columns::NDVI_DATE, columns::NDVI_VALUE, columns::MUNICIPALITY];
    let idx = resolve_headers(path, &headers, &required)?;

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|err| TableError::from_csv(path, err))?;
        let date = parse_date(record.get(idx[0]).unwrap_or(""));
        let value = coerce_number(record.get(idx[1]).unwrap_or(""));
        match (date, value) {
            (Some(date), Some(value)) if value.is_finite() => rows.push(NdviObservation {
                municipality: record.get(idx[2]).unwrap_or("").trim().to_string(),
                date,
                value,
            }),
            _ => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::warn!(
            "Dropped {dropped} NDVI rows with unparseable cells from {}",
            path.display()
        );
    }
    Ok(rows)
}

/// Read a cleaned season-level yield table.
pub fn read_yield(path: &Path) -> Result<Vec<YieldSeason>, TableError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|err| TableError::from_csv(path, err))?
        .clone();
    let required = [
        columns::MUNICIPALITY,
        columns::SEASON,
        columns::REGION,
        columns::AREA_TOTAL,
        columns::PRODUCTION,
        columns::YIELD,
    ];
    let idx = resolve_headers(path, &headers, &required)?;
    let soil_idx = find_header(&headers, columns::SOIL);

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|err| TableError::from_csv(path, err))?;
        let season = SeasonLabel::parse(record.get(idx[1]).unwrap_or("").trim());
        let area = coerce_number(record.get(idx[3]).unwrap_or(""));
        let production = coerce_number(record.get(idx[4]).unwrap_or(""));
        let yield_sc_ha = coerce_number(record.get(idx[5]).unwrap_or(""));
        let (Some(season), Some(area), Some(production), Some(yield_sc_ha)) =
            (season, area, production, yield_sc_ha)
        else {
            dropped += 1;
            continue;
        };
        if !area.is_finite() || !production.is_finite() || !yield_sc_ha.is_finite() || area <= 0.0 {
            dropped += 1;
            continue;
        }
        let soil = soil_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        rows.push(YieldSeason {
            municipality: record.get(idx[0]).unwrap_or("").trim().to_string(),
            season,
            region: record.get(idx[2]).unwrap_or("").trim().to_string(),
            soil,
            area_total_ha: area,
            production_ton: production,
            yield_sc_ha,
        });
    }
    if dropped > 0 {
        tracing::warn!(
            "Dropped {dropped} yield rows with unparseable or non-positive figures from {}",
            path.display()
        );
    }
    Ok(rows)
}

/// Write a cleaned daily climate table.
pub fn write_climate(path: &Path, rows: &[ClimateDay]) -> Result<(), TableError> {
    let mut writer = open_writer(path)?;
    let wrap = |err| TableError::from_csv(path, err);
    writer
        .write_record([
            columns::CLIMATE_DATE,
            columns::CLIMATE_MUNICIPALITY,
            columns::TMAX,
            columns::TMIN,
            columns::TMED,
            columns::HUMIDITY,
            columns::WIND,
            columns::RADIATION,
            columns::RAIN,
        ])
        .map_err(wrap)?;
    for row in rows {
        writer
            .write_record([
                fmt_date(row.date),
                row.municipality.clone(),
                fmt_cell(row.tmax_c),
                fmt_cell(row.tmin_c),
                fmt_cell(row.tmed_c),
                fmt_cell(row.humidity_pct),
                fmt_cell(row.wind_ms),
                fmt_cell(row.radiation_mj_m2),
                fmt_cell(row.rain_mm),
            ])
            .map_err(wrap)?;
    }
    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a cleaned NDVI table.
pub fn write_ndvi(path: &Path, rows: &[NdviObservation]) -> Result<(), TableError> {
    let mut writer = open_writer(path)?;
    let wrap = |err| TableError::from_csv(path, err);
    writer
        .write_record([columns::NDVI_DATE, columns::NDVI_VALUE, columns::MUNICIPALITY])
        .map_err(wrap)?;
    for row in rows {
        writer
            .write_record([
                fmt_date(row.date),
                format!("{:.4}", row.value),
                row.municipality.clone(),
            ])
            .map_err(wrap)?;
    }
    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a cleaned yield table.
pub fn write_yield(path: &Path, rows: &[YieldSeason]) -> Result<(), TableError> {
    let mut writer = open_writer(path)?;
    let wrap = |err| TableError::from_csv(path, err);
    writer
        .write_record([
            columns::MUNICIPALITY,
            columns::SEASON,
            columns::REGION,
            columns::SOIL,
            columns::AREA_TOTAL,
            columns::PRODUCTION,
            columns::YIELD,
        ])
        .map_err(wrap)?;
    for row in rows {
        writer
            .write_record([
                row.municipality.clone(),
                row.season.as_str().to_string(),
                row.region.clone(),
                row.soil.clone().unwrap_or_default(),
                fmt_cell(row.area_total_ha),
                fmt_cell(row.production_ton),
                fmt_cell(row.yield_sc_ha),
            ])
            .map_err(wrap)?;
    }
    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn coerce_accepts_comma_decimals_and_blanks() {
        assert_eq!(coerce_number("12,5"), Some(12.5));
        assert_eq!(coerce_number(" 3.25 "), Some(3.25));
        assert!(coerce_number("").unwrap().is_nan());
        assert_eq!(coerce_number("n/a"), None);
    }

    #[test]
    fn climate_reader_drops_malformed_rows_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clima.csv");
        std::fs::write(
            &path,
            "Data,Municipio,Tmax (°C),Tmin (°C),Tmed (°C),UR (%),U2 (m/s),RS (MJ/m²d),Chuva (mm)\n\
             2022-10-01,Imbaú,30.1,18.2,24.0,70,2.1,22.5,0.0\n\
             not-a-date,Imbaú,30.1,18.2,24.0,70,2.1,22.5,0.0\n\
             2022-10-02,Imbaú,bad,18.2,24.0,70,2.1,22.5,5.5\n\
             2022-10-03,Imbaú,,18.0,23.5,68,2.0,21.0,1.2\n",
        )
        .unwrap();

        let rows = read_climate(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].tmax_c.is_nan());
        assert_eq!(rows[1].rain_mm, 1.2);
    }

    #[test]
    fn missing_columns_are_reported_together() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("soja.csv");
        std::fs::write(&path, "municipio,SAFRA\nImbaú,22/23\n").unwrap();

        let err = read_yield(&path).unwrap_err();
        match err {
            TableError::MissingColumns { names, .. } => {
                assert_eq!(
                    names,
                    vec!["REGIAO", "AREA TOTAL", "PRODUCAO", "YIELD_SC_HA"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn yield_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("yield.csv");
        let rows = vec![YieldSeason {
            municipality: "Imbaú".to_string(),
            season: SeasonLabel::parse("22/23").unwrap(),
            region: "Centro".to_string(),
            soil: None,
            area_total_ha: 50.0,
            production_ton: 100.0,
            yield_sc_ha: 33.33,
        }];
        write_yield(&path, &rows).unwrap();
        let back = read_yield(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].yield_sc_ha, 33.33);
        assert_eq!(back[0].soil, None);
    }

    #[test]
    fn missing_file_is_a_distinct_error() {
        let err = read_ndvi(Path::new("/nonexistent/ndvi.csv")).unwrap_err();
        assert!(matches!(err, TableError::MissingInput { .. }));
    }
}
