//! Buffered grid derivation.
//!
//! Geographic datasets are projected into a UTM zone, buffered in meters and
//! projected back. Projected datasets are buffered in place. Any failure
//! falls back to an unbuffered copy so buffer-only matches come out empty
//! instead of the matcher failing.

use std::panic::{catch_unwind, AssertUnwindSafe};

use geo::{Buffer, MultiPolygon};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::BufferConfig;
use crate::error::{GridError, Result};
use crate::models::{Crs, GridDataset, GridRecord};
use crate::pip::projection::UtmZone;

/// Degrees beyond the zone's own 6° band before extent warnings kick in.
const ZONE_MARGIN_DEG: f64 = 1.0;

/// Outcome of buffered-dataset derivation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BufferState {
    Buffered {
        distance_m: f64,
        /// EPSG code of the UTM zone used, when the dataset was reprojected
        #[serde(skip_serializing_if = "Option::is_none")]
        utm_epsg: Option<i32>,
    },
    /// Buffer-only matches are always empty in this state
    Unbuffered { reason: String },
}

/// Derive the buffered counterpart of `dataset`.
///
/// Never fails; on error the original geometries are returned and the
/// reason is recorded in the state.
pub fn derive_buffered(
    dataset: &GridDataset,
    config: &BufferConfig,
) -> (Vec<GridRecord>, BufferState) {
    match try_derive(dataset, config) {
        Ok((records, state)) => {
            info!(
                "Created {} buffered grids ({} m)",
                records.len(),
                config.distance_m
            );
            (records, state)
        }
        Err(e) => {
            error!("Failed to create buffered grids: {}", e);
            (
                dataset.records.clone(),
                BufferState::Unbuffered {
                    reason: e.to_string(),
                },
            )
        }
    }
}

fn try_derive(
    dataset: &GridDataset,
    config: &BufferConfig,
) -> Result<(Vec<GridRecord>, BufferState)> {
    if !config.distance_m.is_finite() {
        return Err(GridError::Buffer(format!(
            "invalid buffer distance {}",
            config.distance_m
        )));
    }

    let crs = dataset.crs.unwrap_or(Crs::WGS84);

    if crs.is_geographic() {
        let zone = UtmZone::new(config.utm_zone, config.north).ok_or_else(|| {
            GridError::Projection(format!("invalid UTM zone {}", config.utm_zone))
        })?;
        warn_if_outside_zone(dataset, &zone);

        let mut records = Vec::with_capacity(dataset.len());
        for record in &dataset.records {
            let projected = zone.project(&record.geometry)?;
            let buffered = buffer_geometry(&projected, config.distance_m, record)?;
            records.push(with_geometry(record, zone.unproject(&buffered)?));
        }

        Ok((
            records,
            BufferState::Buffered {
                distance_m: config.distance_m,
                utm_epsg: Some(zone.epsg()),
            },
        ))
    } else {
        let mut records = Vec::with_capacity(dataset.len());
        for record in &dataset.records {
            let buffered = buffer_geometry(&record.geometry, config.distance_m, record)?;
            records.push(with_geometry(record, buffered));
        }

        Ok((
            records,
            BufferState::Buffered {
                distance_m: config.distance_m,
                utm_epsg: None,
            },
        ))
    }
}

fn buffer_geometry(
    geometry: &MultiPolygon<f64>,
    distance: f64,
    record: &GridRecord,
) -> Result<MultiPolygon<f64>> {
    let buffered = catch_unwind(AssertUnwindSafe(|| geometry.buffer(distance))).map_err(|_| {
        GridError::Buffer(format!("buffer panicked for grid '{}'", record.id))
    })?;

    if buffered.0.is_empty() && !geometry.0.is_empty() && distance >= 0.0 {
        return Err(GridError::Buffer(format!(
            "empty buffer result for grid '{}'",
            record.id
        )));
    }

    Ok(buffered)
}

fn with_geometry(record: &GridRecord, geometry: MultiPolygon<f64>) -> GridRecord {
    GridRecord {
        row: record.row,
        id: record.id.clone(),
        name: record.name.clone(),
        label: record.label.clone(),
        geometry,
    }
}

fn warn_if_outside_zone(dataset: &GridDataset, zone: &UtmZone) {
    let Some(extent) = dataset.extent() else {
        return;
    };
    if !zone.covers_longitude(extent.min().x, ZONE_MARGIN_DEG)
        || !zone.covers_longitude(extent.max().x, ZONE_MARGIN_DEG)
    {
        warn!(
            "Grid extent {:.3}..{:.3}°E falls outside UTM zone {} (central meridian {}°); buffer distances will be less accurate",
            extent.min().x,
            extent.max().x,
            zone.number(),
            zone.central_meridian()
        );
    }
}
