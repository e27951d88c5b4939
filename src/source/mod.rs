//! Dataset readers for grid polygons and label tables.
//!
//! Grid files are read into a generic [`FeatureTable`] first, then turned
//! into [`GridRecord`]s once the configured id/name/label fields have been
//! resolved against the available columns.

mod feature_collection;
mod gpkg;
mod labels;
mod gpkg_geometry;

use std::path::Path;

use geo::MultiPolygon;
use tracing::{info, warn};

pub use feature_collection::read_geojson;
pub use gpkg::read_gpkg;
pub use labels::{load_labels, LabelMapping};
pub use gpkg_geometry::{decode_gpkg_geometry, decode_wkb};

#[cfg(test)]
pub(crate) use gpkg::tests::write_gpkg as write_test_gpkg;

use crate::config::GridConfig;
use crate::error::{GridError, Result};
use crate::models::{Crs, FieldResolution, GridDataset, GridRecord};

/// One feature: attribute values aligned with [`FeatureTable::columns`].
#[derive(Debug, Clone)]
pub struct Feature {
    pub attributes: Vec<Option<String>>,
    /// `None` when missing, empty, or not polygonal
    pub geometry: Option<MultiPolygon<f64>>,
}

/// Attribute columns plus features, as read from a vector file.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub features: Vec<Feature>,
    /// `None` when the source declares no CRS
    pub crs: Option<Crs>,
}

impl FeatureTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Read a vector file, choosing the reader by extension.
pub fn read_features(path: &Path, layer: Option<&str>) -> Result<FeatureTable> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("gpkg") => read_gpkg(path, layer),
        Some("geojson") | Some("json") => read_geojson(path),
        _ => Err(GridError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Load the grid dataset described by `config`.
///
/// Missing fields are logged, not fatal: the label field falls back to the
/// configured alternative, and records without an id simply never show up
/// in id output.
pub fn load_grids(config: &GridConfig) -> Result<GridDataset> {
    let table = read_features(&config.path, config.layer.as_deref())?;
    info!("Loaded grid dataset: {} features", table.features.len());
    Ok(build_dataset(table, config))
}

fn build_dataset(table: FeatureTable, config: &GridConfig) -> GridDataset {
    let fields = resolve_fields(&table, config);

    let id_idx = fields.id_field.as_deref().and_then(|f| table.column_index(f));
    let name_idx = fields.name_field.as_deref().and_then(|f| table.column_index(f));
    let label_idx = fields.label_field.as_deref().and_then(|f| table.column_index(f));

    let mut skipped = 0usize;
    let mut records = Vec::with_capacity(table.features.len());
    for (row, feature) in table.features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            skipped += 1;
            continue;
        };
        let attr = |idx: Option<usize>| {
            idx.and_then(|i| feature.attributes.get(i).cloned().flatten())
        };
        records.push(GridRecord {
            row,
            id: attr(id_idx).unwrap_or_default(),
            name: attr(name_idx).unwrap_or_default(),
            label: attr(label_idx).filter(|l| !l.is_empty()),
            geometry,
        });
    }

    if skipped > 0 {
        warn!("Skipped {} features without usable polygon geometry", skipped);
    }

    GridDataset {
        records,
        crs: table.crs,
        fields,
    }
}

fn resolve_fields(table: &FeatureTable, config: &GridConfig) -> FieldResolution {
    let has = |name: &str| table.column_index(name).is_some();

    let missing: Vec<String> = [&config.id_field, &config.name_field, &config.label_field]
        .into_iter()
        .filter(|f| !has(f.as_str()))
        .cloned()
        .collect();

    let mut label_field = has(config.label_field.as_str()).then(|| config.label_field.clone());

    if !missing.is_empty() {
        warn!("Grid dataset is missing fields: {:?}", missing);
        info!("Available fields: {:?}", table.columns);
        if label_field.is_none() && has(config.fallback_label_field.as_str()) {
            info!(
                "Using '{}' as the grid label field",
                config.fallback_label_field
            );
            label_field = Some(config.fallback_label_field.clone());
        }
    }

    FieldResolution {
        id_field: has(config.id_field.as_str()).then(|| config.id_field.clone()),
        name_field: has(config.name_field.as_str()).then(|| config.name_field.clone()),
        label_field,
        missing,
    }
}

/// Render a numeric cell as text; integral values drop the decimal part.
pub(crate) fn render_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn grid_config(path: &Path) -> GridConfig {
        crate::config::MatcherConfig::new(path, "labels.csv").grid
    }

    fn table(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> FeatureTable {
        FeatureTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            features: rows
                .into_iter()
                .map(|attrs| Feature {
                    attributes: attrs.into_iter().map(|a| a.map(String::from)).collect(),
                    geometry: Some(MultiPolygon::new(vec![polygon![
                        (x: 0.0, y: 0.0),
                        (x: 1.0, y: 0.0),
                        (x: 1.0, y: 1.0),
                        (x: 0.0, y: 0.0),
                    ]])),
                })
                .collect(),
            crs: None,
        }
    }

    #[test]
    fn test_all_fields_present() {
        let t = table(
            &["序号", "中文名", "ABC网格"],
            vec![vec![Some("1"), Some("城东"), Some("A")]],
        );
        let dataset = build_dataset(t, &grid_config(Path::new("g.gpkg")));

        assert!(dataset.fields.missing.is_empty());
        assert_eq!(dataset.records[0].id, "1");
        assert_eq!(dataset.records[0].name, "城东");
        assert_eq!(dataset.records[0].label.as_deref(), Some("A"));
    }

    #[test]
    fn test_label_falls_back_to_scene() {
        let t = table(
            &["序号", "中文名", "场景"],
            vec![vec![Some("1"), Some("城东"), Some("住宅")]],
        );
        let dataset = build_dataset(t, &grid_config(Path::new("g.gpkg")));

        assert_eq!(dataset.fields.missing, vec!["ABC网格".to_string()]);
        assert_eq!(dataset.fields.label_field.as_deref(), Some("场景"));
        assert_eq!(dataset.records[0].label.as_deref(), Some("住宅"));
    }

    #[test]
    fn test_missing_id_field_leaves_ids_empty() {
        let t = table(&["中文名"], vec![vec![Some("城东")]]);
        let dataset = build_dataset(t, &grid_config(Path::new("g.gpkg")));

        assert_eq!(dataset.fields.id_field, None);
        assert_eq!(dataset.records[0].id, "");
        assert_eq!(dataset.records[0].label, None);
    }

    #[test]
    fn test_rows_without_geometry_keep_row_numbers() {
        let mut t = table(
            &["序号", "中文名"],
            vec![vec![Some("1"), Some("a")], vec![Some("2"), Some("b")]],
        );
        t.features[0].geometry = None;
        let dataset = build_dataset(t, &grid_config(Path::new("g.gpkg")));

        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.records[0].row, 1);
        assert_eq!(dataset.records[0].id, "2");
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            read_features(Path::new("grids.shp"), None),
            Err(GridError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_render_number() {
        assert_eq!(render_number(12.0), "12");
        assert_eq!(render_number(-3.0), "-3");
        assert_eq!(render_number(2.5), "2.5");
        assert_eq!(render_number(f64::NAN), "NaN");
    }
}
