//! Error types for dataset loading and point queries.

use std::path::PathBuf;

/// Failures while reading the grid dataset, the label table, or deriving
/// the buffered grids.
///
/// None of these reach the caller of [`crate::GridMatcher::new`]; they are
/// logged and folded into the matcher's [`crate::LoadReport`].
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),
    #[error("WKB error: {0}")]
    Wkb(#[from] wkb::error::WkbError),
    #[error("Malformed geometry: {0}")]
    Geometry(String),
    #[error("GeoPackage has no feature layer matching '{0}'")]
    MissingLayer(String),
    #[error("Unsupported file format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("Projection error: {0}")]
    Projection(String),
    #[error("Buffer error: {0}")]
    Buffer(String),
}

pub type Result<T> = std::result::Result<T, GridError>;

/// Reasons a single point query produced no match.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("coordinate is missing or not numeric")]
    InvalidCoordinate,
    #[error("coordinate ({lon}, {lat}) is outside the operational bounds")]
    OutOfBounds { lon: f64, lat: f64 },
    #[error("grid dataset is not loaded")]
    NotLoaded,
}
