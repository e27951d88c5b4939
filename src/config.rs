//! Matcher configuration.
//!
//! Every path is explicit; nothing is resolved against an assumed project
//! layout. Field names default to the columns of the operational grid
//! dataset and label table.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct MatcherConfig {
    pub grid: GridConfig,
    pub labels: LabelConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub bounds: Bounds,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GridConfig {
    /// GeoPackage (`.gpkg`) or GeoJSON (`.geojson`, `.json`) polygon file
    pub path: PathBuf,
    /// GeoPackage layer; the first feature layer when unset
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
    #[serde(default = "default_label_field")]
    pub label_field: String,
    /// Used when `label_field` is absent from the dataset
    #[serde(default = "default_fallback_label_field")]
    pub fallback_label_field: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelConfig {
    /// CSV or spreadsheet (`.xlsx`, `.xls`, `.ods`) label table
    pub path: PathBuf,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_label_column")]
    pub label_column: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct BufferConfig {
    #[serde(default = "default_distance")]
    pub distance_m: f64,
    /// UTM zone used to buffer geographic datasets in meters
    #[serde(default = "default_utm_zone")]
    pub utm_zone: u8,
    #[serde(default = "default_north")]
    pub north: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            distance_m: default_distance(),
            utm_zone: default_utm_zone(),
            north: default_north(),
        }
    }
}

/// Sanity box for query coordinates (degrees, inclusive).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Bounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min_lon: 70.0,
            max_lon: 140.0,
            min_lat: 15.0,
            max_lat: 55.0,
        }
    }
}

impl Bounds {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

impl MatcherConfig {
    /// Configuration with default field names for the given dataset paths.
    pub fn new(grid_path: impl Into<PathBuf>, label_path: impl Into<PathBuf>) -> Self {
        Self {
            grid: GridConfig {
                path: grid_path.into(),
                layer: None,
                id_field: default_id_field(),
                name_field: default_name_field(),
                label_field: default_label_field(),
                fallback_label_field: default_fallback_label_field(),
            },
            labels: LabelConfig {
                path: label_path.into(),
                id_column: default_id_column(),
                label_column: default_label_column(),
            },
            buffer: BufferConfig::default(),
            bounds: Bounds::default(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: MatcherConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Combine an optional config file with command-line path overrides.
    ///
    /// Without a config file both paths must be given.
    pub fn from_args(
        config_file: Option<&Path>,
        grid: Option<PathBuf>,
        labels: Option<PathBuf>,
    ) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let grid = grid.clone().context("--grid is required without --config")?;
                let labels = labels
                    .clone()
                    .context("--labels is required without --config")?;
                Self::new(grid, labels)
            }
        };

        if let Some(grid) = grid {
            config.grid.path = grid;
        }
        if let Some(labels) = labels {
            config.labels.path = labels;
        }
        Ok(config)
    }
}

fn default_id_field() -> String {
    "序号".to_string()
}

fn default_name_field() -> String {
    "中文名".to_string()
}

fn default_label_field() -> String {
    "ABC网格".to_string()
}

fn default_fallback_label_field() -> String {
    "场景".to_string()
}

fn default_id_column() -> String {
    "微网格id".to_string()
}

fn default_label_column() -> String {
    "类型".to_string()
}

fn default_distance() -> f64 {
    500.0
}

fn default_utm_zone() -> u8 {
    49
}

fn default_north() -> bool {
    true
}
