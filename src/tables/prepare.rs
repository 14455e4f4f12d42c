//! Upstream cleaning stages producing the processed tables.
//!
//! Mirrors the three preparation steps that precede master-dataset assembly:
//! NDVI municipality-name extraction, yield computation, and climate
//! season-month filtering. Each step reads a raw CSV and writes a processed
//! CSV; they share the best-effort coercion policy of the readers.

use std::collections::BTreeSet;
use std::path::Path;

use regex::Regex;

use super::columns;
use super::io::{self, TableError};
use super::records::{NdviObservation, YieldSeason};
use crate::season::SeasonLabel;

/// Clean raw NDVI rows: extract the municipality display name from the layer
/// identifier (e.g. `"api_Municipios — camada_unida_Pinhal_de_São_Bento_1_1"`
/// becomes `"Pinhal de São Bento"`), then keep only allow-listed names.
pub fn prepare_ndvi(
    input: &Path,
    output: &Path,
    municipalities: &[String],
) -> Result<usize, TableError> {
    tracing::info!("Preparing NDVI data from {}", input.display());
    let raw = io::read_ndvi(input)?;
    tracing::info!("Loaded {} NDVI rows", raw.len());

    // Identifiers that do not match the layer pattern pass through unchanged.
    let pattern = Regex::new(r"unida_(.+?)_\d+_\d+").expect("layer id regex must compile");
    let allowed: BTreeSet<&str> = municipalities.iter().map(String::as_str).collect();

    let cleaned: Vec<NdviObservation> = raw
        .into_iter()
        .filter_map(|row| {
            let extracted = pattern
                .captures(&row.municipality)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
                .unwrap_or(&row.municipality);
            let name = extracted.replace('_', " ").trim().to_string();
            allowed.contains(name.as_str()).then_some(NdviObservation {
                municipality: name,
                ..row
            })
        })
        .collect();

    if cleaned.is_empty() {
        tracing::warn!("No allow-listed municipality found in the NDVI table; output will be empty");
    } else {
        tracing::info!("Kept {} NDVI rows after municipality filter", cleaned.len());
    }
    io::write_ndvi(output, &cleaned)?;
    tracing::info!("NDVI table written to {}", output.display());
    Ok(cleaned.len())
}

/// Compute productivity from raw production figures.
///
/// Rows with unparseable production/area or non-positive area are dropped.
pub fn prepare_yield(input: &Path, output: &Path) -> Result<usize, TableError> {
    tracing::info!("Preparing yield data from {}", input.display());
    let mut reader = io::open_reader(input)?;
    let headers = reader
        .headers()
        .map_err(|err| TableError::from_csv(input, err))?
        .clone();
    let required = [
        columns::PRODUCTION,
        columns::AREA_TOTAL,
        columns::YIELD_MUNICIPALITY,
        columns::SEASON,
        columns::REGION,
    ];
    let idx = io::resolve_headers(input, &headers, &required)?;
    let soil_idx = io::find_header(&headers, columns::SOIL);

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|err| TableError::from_csv(input, err))?;
        let production = io::coerce_number(record.get(idx[0]).unwrap_or(""));
        let area = io::coerce_number(record.get(idx[1]).unwrap_or(""));
        let season = SeasonLabel::parse(record.get(idx[3]).unwrap_or("").trim());
        let (Some(production), Some(area), Some(season)) = (production, area, season) else {
            dropped += 1;
            continue;
        };
        if !production.is_finite() || !area.is_finite() || area <= 0.0 {
            dropped += 1;
            continue;
        }
        let soil = soil_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        rows.push(YieldSeason {
            municipality: record.get(idx[2]).unwrap_or("").trim().to_string(),
            season,
            region: record.get(idx[4]).unwrap_or("").trim().to_string(),
            soil,
            area_total_ha: area,
            production_ton: production,
            yield_sc_ha: YieldSeason::compute_yield(production, area),
        });
    }
    if dropped > 0 {
        tracing::warn!("Dropped {dropped} yield rows with invalid production or area figures");
    }

    let mean_yield = if rows.is_empty() {
        0.0
    } else {
        rows.iter().map(|r| r.yield_sc_ha).sum::<f64>() / rows.len() as f64
    };
    tracing::info!(
        "Computed productivity for {} municipality-seasons (mean {:.2} sc/ha)",
        rows.len(),
        mean_yield
    );
    io::write_yield(output, &rows)?;
    tracing::info!("Yield table written to {}", output.display());
    Ok(rows.len())
}

/// Filter raw climate rows to the configured season months.
pub fn prepare_climate(
    input: &Path,
    output: &Path,
    season_months: &[u8],
) -> Result<usize, TableError> {
    tracing::info!("Preparing climate data from {}", input.display());
    let raw = io::read_climate(input)?;
    tracing::info!("Loaded {} climate rows", raw.len());

    let months: BTreeSet<u8> = season_months.iter().copied().collect();
    let filtered: Vec<_> = raw
        .into_iter()
        .filter(|row| months.contains(&u8::from(row.date.month())))
        .collect();
    tracing::info!("Season-month filter kept {} climate rows", filtered.len());

    io::write_climate(output, &filtered)?;
    tracing::info!("Climate table written to {}", output.display());
    Ok(filtered.len())
}
