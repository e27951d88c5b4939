//! Grid polygon records and the dataset that holds them.

use geo::{BoundingRect, MultiPolygon, Rect};
use serde::Serialize;

use crate::pip::projection::UtmZone;

/// Coordinate reference system of a grid dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Longitude/latitude in degrees
    Geographic { epsg: Option<i32> },
    /// Planar coordinates, assumed to be in meters
    Projected {
        epsg: Option<i32>,
        /// Set when the system is a WGS84 UTM zone, so query points can be
        /// projected into it
        utm: Option<UtmZone>,
    },
}

impl Crs {
    /// WGS84, assigned to datasets that declare no CRS.
    pub const WGS84: Crs = Crs::Geographic { epsg: Some(4326) };

    /// Classify an EPSG code when no WKT definition is available.
    ///
    /// 326xx/327xx are the WGS84 UTM zones; other 4xxx codes are treated
    /// as geographic and everything else as projected.
    pub fn from_epsg(code: i32) -> Self {
        match code {
            32601..=32660 => Crs::Projected {
                epsg: Some(code),
                utm: UtmZone::new((code - 32600) as u8, true),
            },
            32701..=32760 => Crs::Projected {
                epsg: Some(code),
                utm: UtmZone::new((code - 32700) as u8, false),
            },
            4000..=4999 => Crs::Geographic { epsg: Some(code) },
            _ => Crs::Projected {
                epsg: Some(code),
                utm: None,
            },
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Geographic { .. })
    }

    pub fn epsg(&self) -> Option<i32> {
        match self {
            Crs::Geographic { epsg } | Crs::Projected { epsg, .. } => *epsg,
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_geographic() {
            "geographic"
        } else {
            "projected"
        };
        match self.epsg() {
            Some(code) => write!(f, "EPSG:{} ({})", code, kind),
            None => write!(f, "unknown {} CRS", kind),
        }
    }
}

/// A single grid polygon with its attributes.
#[derive(Debug, Clone)]
pub struct GridRecord {
    /// Position in the source dataset; match output follows this order
    pub row: usize,
    pub id: String,
    pub name: String,
    /// The dataset's own label attribute, if the label field exists
    pub label: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

impl GridRecord {
    pub fn bbox(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

/// Which of the configured fields were found in the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldResolution {
    pub id_field: Option<String>,
    pub name_field: Option<String>,
    pub label_field: Option<String>,
    pub missing: Vec<String>,
}

/// An ordered, read-only set of grid polygons.
#[derive(Debug, Clone)]
pub struct GridDataset {
    pub records: Vec<GridRecord>,
    /// `None` when the source declares no CRS
    pub crs: Option<Crs>,
    pub fields: FieldResolution,
}

impl GridDataset {
    pub fn new(records: Vec<GridRecord>, crs: Option<Crs>) -> Self {
        Self {
            records,
            crs,
            fields: FieldResolution::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Combined bounding box of all records
    pub fn extent(&self) -> Option<Rect<f64>> {
        self.records
            .iter()
            .filter_map(GridRecord::bbox)
            .reduce(|a, b| {
                Rect::new(
                    (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                    (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
                )
            })
    }
}
