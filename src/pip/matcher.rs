//! Grid matcher: exact and buffered point-in-grid lookups with labels.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use hashbrown::HashSet;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::buffer::{derive_buffered, BufferState};
use super::index::GridSpatialIndex;
use super::projection::UtmZone;
use crate::config::{Bounds, GridConfig, LabelConfig, MatcherConfig};
use crate::coord::CoordValue;
use crate::error::MatchError;
use crate::models::{Crs, FieldResolution, GridDataset, GridHit, GridMatch, GridRecord, MatchResult};
use crate::source::{load_grids, load_labels, LabelMapping};

/// Outcome of loading one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    Loaded { count: usize },
    Missing { path: String },
    Failed { reason: String },
    /// Built from in-memory data rather than read from a file
    Provided { count: usize },
}

impl LoadState {
    pub fn is_ok(&self) -> bool {
        matches!(self, LoadState::Loaded { .. } | LoadState::Provided { .. })
    }
}

/// What happened while the matcher was being built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub grids: LoadState,
    /// `None` when there was no grid dataset to buffer
    pub buffer: Option<BufferState>,
    pub labels: LoadState,
    /// CRS the grids were matched in, e.g. "EPSG:4326 (geographic)"
    pub crs: Option<String>,
    pub fields: Option<FieldResolution>,
}

/// Point-in-grid matcher.
///
/// All datasets are loaded at construction and never mutated afterwards,
/// so a matcher can be shared freely between threads.
pub struct GridMatcher {
    grids: GridSpatialIndex,
    buffered: GridSpatialIndex,
    labels: LabelMapping,
    /// Query points are projected into this zone for UTM datasets
    point_projection: Option<UtmZone>,
    bounds: Bounds,
    report: LoadReport,
}

impl GridMatcher {
    /// Load the grid dataset and label table named in `config`.
    ///
    /// Never fails: missing or unreadable inputs leave the matcher empty or
    /// unlabeled, which [`Self::is_loaded`] and [`Self::load_report`] expose.
    pub fn new(config: &MatcherConfig) -> Self {
        let (dataset, grid_state) = load_grid_dataset(&config.grid);
        let (labels, label_state) = load_label_mapping(&config.labels);
        Self::assemble(dataset, grid_state, labels, label_state, config)
    }

    /// Build a matcher from already-loaded data. Paths in `config` are ignored.
    pub fn from_parts(dataset: GridDataset, labels: LabelMapping, config: &MatcherConfig) -> Self {
        let grid_state = LoadState::Provided {
            count: dataset.len(),
        };
        let label_state = LoadState::Provided {
            count: labels.len(),
        };
        Self::assemble(Some(dataset), grid_state, labels, label_state, config)
    }

    fn assemble(
        dataset: Option<GridDataset>,
        grid_state: LoadState,
        labels: LabelMapping,
        label_state: LoadState,
        config: &MatcherConfig,
    ) -> Self {
        let Some(mut dataset) = dataset else {
            return Self {
                grids: GridSpatialIndex::build(Vec::new()),
                buffered: GridSpatialIndex::build(Vec::new()),
                labels,
                point_projection: None,
                bounds: config.bounds,
                report: LoadReport {
                    grids: grid_state,
                    buffer: None,
                    labels: label_state,
                    crs: None,
                    fields: None,
                },
            };
        };

        let crs = match dataset.crs {
            Some(crs) => crs,
            None => {
                warn!("Grid dataset has no CRS, assuming WGS84");
                dataset.crs = Some(Crs::WGS84);
                Crs::WGS84
            }
        };

        let point_projection = match crs {
            Crs::Projected { utm, .. } => {
                if utm.is_none() {
                    warn!(
                        "Grid dataset uses {}; query points are matched without reprojection",
                        crs
                    );
                }
                utm
            }
            Crs::Geographic { .. } => None,
        };

        let (buffered_records, buffer_state) = derive_buffered(&dataset, &config.buffer);
        let fields = dataset.fields.clone();
        let grids = GridSpatialIndex::build(dataset.records);

        // Counts reflect indexed grids, so the report agrees with is_loaded.
        let grid_state = match grid_state {
            LoadState::Loaded { .. } | LoadState::Provided { .. } if grids.is_empty() => {
                warn!("Grid dataset has no usable polygon geometry");
                LoadState::Failed {
                    reason: "no usable polygon geometry".to_string(),
                }
            }
            LoadState::Loaded { .. } => LoadState::Loaded { count: grids.len() },
            LoadState::Provided { .. } => LoadState::Provided { count: grids.len() },
            other => other,
        };

        let report = LoadReport {
            grids: grid_state,
            buffer: Some(buffer_state),
            labels: label_state,
            crs: Some(crs.to_string()),
            fields: Some(fields),
        };

        Self {
            grids,
            buffered: GridSpatialIndex::build(buffered_records),
            labels,
            point_projection,
            bounds: config.bounds,
            report,
        }
    }

    /// Whether at least one grid is indexed. Matches
    /// `load_report().grids.is_ok()`.
    pub fn is_loaded(&self) -> bool {
        !self.grids.is_empty()
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    /// Strict lookup returning structured hits or the reason there are none.
    pub fn locate<X: CoordValue, Y: CoordValue>(
        &self,
        lon: X,
        lat: Y,
    ) -> Result<GridMatch, MatchError> {
        let (Some(lon), Some(lat)) = (lon.as_degrees(), lat.as_degrees()) else {
            return Err(MatchError::InvalidCoordinate);
        };

        if !self.bounds.contains(lon, lat) {
            return Err(MatchError::OutOfBounds { lon, lat });
        }

        if !self.is_loaded() {
            return Err(MatchError::NotLoaded);
        }

        let (x, y) = match &self.point_projection {
            Some(zone) => zone.forward(lon, lat),
            None => (lon, lat),
        };

        let exact: Vec<GridHit> = self
            .grids
            .lookup(x, y)
            .into_iter()
            .map(|r| self.hit(r))
            .collect();

        let buffered: Vec<GridHit> = {
            let exact_ids: HashSet<&str> = exact
                .iter()
                .map(|h| h.id.as_str())
                .filter(|id| !id.is_empty())
                .collect();

            self.buffered
                .lookup(x, y)
                .into_iter()
                .filter(|r| !r.id.is_empty() && !exact_ids.contains(r.id.as_str()))
                .map(|r| self.hit(r))
                .collect()
        };

        debug!(
            "Grid lookup at ({}, {}): {} exact, {} buffer-only",
            lon,
            lat,
            exact.len(),
            buffered.len()
        );

        Ok(GridMatch { exact, buffered })
    }

    /// Match a single point. Never fails: any problem yields the all-null
    /// result.
    pub fn match_point<X: CoordValue, Y: CoordValue>(&self, lon: X, lat: Y) -> MatchResult {
        let lon = lon.as_degrees();
        let lat = lat.as_degrees();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.locate(lon, lat)));

        match outcome {
            Ok(Ok(found)) => found.to_result(),
            Ok(Err(MatchError::OutOfBounds { lon, lat })) => {
                warn!("Coordinate out of range: ({}, {})", lon, lat);
                MatchResult::empty()
            }
            Ok(Err(e)) => {
                debug!("No match for ({:?}, {:?}): {}", lon, lat, e);
                MatchResult::empty()
            }
            Err(_) => {
                error!("Grid matching failed for ({:?}, {:?})", lon, lat);
                MatchResult::empty()
            }
        }
    }

    /// Match points independently, in input order.
    pub fn match_batch<I, X, Y>(&self, points: I) -> Vec<MatchResult>
    where
        I: IntoIterator<Item = (X, Y)>,
        X: CoordValue,
        Y: CoordValue,
    {
        points
            .into_iter()
            .map(|(lon, lat)| self.match_point(lon, lat))
            .collect()
    }

    /// [`Self::match_batch`] on the rayon pool; output order matches input.
    pub fn par_match_batch<X, Y>(&self, points: &[(X, Y)]) -> Vec<MatchResult>
    where
        X: CoordValue + Sync,
        Y: CoordValue + Sync,
    {
        points
            .par_iter()
            .map(|(lon, lat)| self.match_point(lon, lat))
            .collect()
    }

    fn hit(&self, record: &GridRecord) -> GridHit {
        let labels = if record.id.is_empty() {
            None
        } else {
            self.labels.joined(&record.id)
        };
        GridHit {
            id: record.id.clone(),
            name: record.name.clone(),
            attribute_label: record.label.clone(),
            labels,
        }
    }
}

fn load_grid_dataset(config: &GridConfig) -> (Option<GridDataset>, LoadState) {
    if !config.path.exists() {
        warn!("Grid file not found: {}", config.path.display());
        return (None, missing(&config.path));
    }

    match load_grids(config) {
        Ok(dataset) => {
            info!("Loaded {} grids from {}", dataset.len(), config.path.display());
            let state = LoadState::Loaded {
                count: dataset.len(),
            };
            (Some(dataset), state)
        }
        Err(e) => {
            error!("Failed to load grid data from {}: {}", config.path.display(), e);
            (
                None,
                LoadState::Failed {
                    reason: e.to_string(),
                },
            )
        }
    }
}

fn load_label_mapping(config: &LabelConfig) -> (LabelMapping, LoadState) {
    if !config.path.exists() {
        warn!("Label file not found: {}", config.path.display());
        return (LabelMapping::new(), missing(&config.path));
    }

    match load_labels(config) {
        Ok(mapping) => {
            let state = LoadState::Loaded {
                count: mapping.len(),
            };
            (mapping, state)
        }
        Err(e) => {
            error!("Failed to load label table from {}: {}", config.path.display(), e);
            (
                LabelMapping::new(),
                LoadState::Failed {
                    reason: e.to_string(),
                },
            )
        }
    }
}

fn missing(path: &Path) -> LoadState {
    LoadState::Missing {
        path: path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use geo::{polygon, MultiPolygon};
    use std::io::Write;

    // Two grids near 112°E, 22°N with a ~310 m gap between them:
    //   A: 112.000..112.010 x 22.000..22.010
    //   B: 112.013..112.023 x 22.000..22.010
    fn rect(row: usize, id: &str, name: &str, x0: f64, x1: f64) -> GridRecord {
        GridRecord {
            row,
            id: id.to_string(),
            name: name.to_string(),
            label: None,
            geometry: MultiPolygon::new(vec![polygon![
                (x: x0, y: 22.0),
                (x: x1, y: 22.0),
                (x: x1, y: 22.01),
                (x: x0, y: 22.01),
                (x: x0, y: 22.0),
            ]]),
        }
    }

    fn config() -> MatcherConfig {
        MatcherConfig::new("unused.gpkg", "unused.csv")
    }

    fn labels() -> LabelMapping {
        vec![("A1", "商务"), ("B2", "住宅"), ("B2", "学校")]
            .into_iter()
            .collect()
    }

    fn matcher() -> GridMatcher {
        let dataset = GridDataset::new(
            vec![
                rect(0, "A1", "城东", 112.0, 112.01),
                rect(1, "B2", "城西", 112.013, 112.023),
            ],
            Some(Crs::WGS84),
        );
        GridMatcher::from_parts(dataset, labels(), &config())
    }

    #[test]
    fn test_point_inside_single_grid() {
        let m = matcher();
        let result = m.match_point(112.002, 22.005);

        assert_eq!(result.grid_id_no_buffer.as_deref(), Some("A1"));
        assert_eq!(result.grid_name_no_buffer.as_deref(), Some("城东"));
        assert_eq!(result.grid_label_no_buffer.as_deref(), Some("商务"));
        assert_eq!(result.grid_id_buffer_500m, None);
        assert_eq!(result.grid_name_buffer_500m, None);
        assert_eq!(result.grid_label_buffer_500m, None);
    }

    #[test]
    fn test_point_near_single_grid() {
        let m = matcher();
        // ~330 m north of A, ~830 m from B
        let result = m.match_point(112.005, 22.013);

        assert_eq!(result.grid_id_no_buffer, None);
        assert_eq!(result.grid_name_no_buffer, None);
        assert_eq!(result.grid_label_no_buffer, None);
        assert_eq!(result.grid_id_buffer_500m.as_deref(), Some("A1"));
        assert_eq!(result.grid_name_buffer_500m.as_deref(), Some("城东"));
        assert_eq!(result.grid_label_buffer_500m.as_deref(), Some("商务"));
    }

    #[test]
    fn test_buffer_excludes_exact_matches() {
        let m = matcher();
        // Inside A, ~410 m west of B
        let found = m.locate(112.009, 22.005).unwrap();
        assert_eq!(found.exact.len(), 1);
        assert_eq!(found.exact[0].id, "A1");
        assert_eq!(found.buffered.len(), 1);
        assert_eq!(found.buffered[0].id, "B2");

        let result = found.to_result();
        assert_eq!(result.grid_id_no_buffer.as_deref(), Some("A1"));
        assert_eq!(result.grid_id_buffer_500m.as_deref(), Some("B2"));
        assert_eq!(result.grid_label_buffer_500m.as_deref(), Some("住宅,学校"));
    }

    #[test]
    fn test_out_of_bounds_is_all_null() {
        let m = matcher();
        assert!(m.match_point(200.0, 22.0).is_empty());
        assert!(m.match_point(112.0, 60.0).is_empty());
        assert_eq!(
            m.locate(200.0, 22.0),
            Err(MatchError::OutOfBounds {
                lon: 200.0,
                lat: 22.0
            })
        );
    }

    #[test]
    fn test_malformed_input_is_all_null() {
        let m = matcher();
        assert!(m.match_point("abc", 22.0).is_empty());
        assert!(m.match_point(None::<f64>, Some(22.0)).is_empty());
        assert!(m.match_point(f64::NAN, 22.0).is_empty());
        assert_eq!(m.locate("", 22.0), Err(MatchError::InvalidCoordinate));
    }

    #[test]
    fn test_string_coordinates_are_accepted() {
        let m = matcher();
        assert_eq!(m.match_point("112.002", " 22.005 "), m.match_point(112.002, 22.005));
    }

    #[test]
    fn test_batch_equals_individual_matches() {
        let m = matcher();
        let points = vec![
            ("112.002".to_string(), "22.005".to_string()),
            ("200".to_string(), "22".to_string()),
            ("x".to_string(), "22".to_string()),
            ("112.009".to_string(), "22.005".to_string()),
        ];

        let batch = m.match_batch(points.clone());
        let single: Vec<MatchResult> = points
            .iter()
            .map(|(lon, lat)| m.match_point(lon, lat))
            .collect();
        assert_eq!(batch, single);
        assert_eq!(m.par_match_batch(&points), single);
    }

    #[test]
    fn test_missing_files_leave_matcher_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = MatcherConfig::new(dir.path().join("none.gpkg"), dir.path().join("none.xlsx"));
        let m = GridMatcher::new(&config);

        assert!(!m.is_loaded());
        assert!(matches!(m.load_report().grids, LoadState::Missing { .. }));
        assert!(matches!(m.load_report().labels, LoadState::Missing { .. }));
        assert_eq!(m.load_report().buffer, None);
        assert!(m.match_point(112.002, 22.005).is_empty());
        assert_eq!(m.locate(112.002, 22.005), Err(MatchError::NotLoaded));
    }

    #[test]
    fn test_unbuffered_fallback_has_no_buffer_matches() {
        let dataset = GridDataset::new(vec![rect(0, "A1", "城东", 112.0, 112.01)], None);
        let mut config = config();
        config.buffer = BufferConfig {
            utm_zone: 99,
            ..BufferConfig::default()
        };
        let m = GridMatcher::from_parts(dataset, labels(), &config);

        assert!(matches!(
            m.load_report().buffer,
            Some(BufferState::Unbuffered { .. })
        ));
        assert_eq!(m.load_report().crs.as_deref(), Some("EPSG:4326 (geographic)"));
        assert!(m.match_point(112.005, 22.013).is_empty());
        assert_eq!(
            m.match_point(112.002, 22.005).grid_id_no_buffer.as_deref(),
            Some("A1")
        );
    }

    #[test]
    fn test_overlapping_grids_join_in_row_order() {
        let dataset = GridDataset::new(
            vec![
                rect(0, "A1", "城东", 112.0, 112.01),
                rect(1, "C3", "城中", 112.004, 112.008),
            ],
            Some(Crs::WGS84),
        );
        let labels: LabelMapping = vec![("A1", "商务"), ("C3", "商务")].into_iter().collect();
        let m = GridMatcher::from_parts(dataset, labels, &config());
        let result = m.match_point(112.006, 22.005);

        assert_eq!(result.grid_id_no_buffer.as_deref(), Some("A1,C3"));
        assert_eq!(result.grid_name_no_buffer.as_deref(), Some("城东,城中"));
        assert_eq!(result.grid_label_no_buffer.as_deref(), Some("商务"));
        assert_eq!(result.grid_id_buffer_500m, None);
    }

    #[test]
    fn test_projected_dataset_matches_geographic_points() {
        let zone = UtmZone::new(49, true).unwrap();
        let (x0, y0) = zone.forward(112.0, 22.0);
        let projected = MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + 1000.0, y: y0),
            (x: x0 + 1000.0, y: y0 + 1000.0),
            (x: x0, y: y0 + 1000.0),
            (x: x0, y: y0),
        ]]);
        let dataset = GridDataset::new(
            vec![GridRecord {
                row: 0,
                id: "P".to_string(),
                name: "投影".to_string(),
                label: None,
                geometry: projected,
            }],
            Some(Crs::from_epsg(32649)),
        );
        let m = GridMatcher::from_parts(dataset, LabelMapping::new(), &config());

        assert_eq!(
            m.match_point(112.002, 22.002).grid_id_no_buffer.as_deref(),
            Some("P")
        );
        // ~200 m south of the grid
        let (lon, lat) = zone.inverse(x0 + 500.0, y0 - 200.0);
        assert_eq!(m.match_point(lon, lat).grid_id_buffer_500m.as_deref(), Some("P"));
    }

    #[test]
    fn test_loads_geojson_and_csv_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let grid_path = dir.path().join("grids.geojson");
        let label_path = dir.path().join("labels.csv");

        let geojson = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"序号": 5, "中文名": "海滨", "场景": "景区"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[112.0, 22.0], [112.01, 22.0], [112.01, 22.01], [112.0, 22.01], [112.0, 22.0]]]
                }
            }]
        });
        std::fs::write(&grid_path, geojson.to_string()).unwrap();
        let mut labels = std::fs::File::create(&label_path).unwrap();
        writeln!(labels, "微网格id,类型").unwrap();
        writeln!(labels, "5,旅游").unwrap();
        writeln!(labels, "5,商业").unwrap();

        let m = GridMatcher::new(&MatcherConfig::new(&grid_path, &label_path));
        assert!(m.is_loaded());
        assert_eq!(m.load_report().grids, LoadState::Loaded { count: 1 });
        assert_eq!(m.load_report().labels, LoadState::Loaded { count: 1 });
        assert_eq!(
            m.load_report().fields.as_ref().unwrap().label_field.as_deref(),
            Some("场景")
        );

        let result = m.match_point(112.005, 22.005);
        assert_eq!(result.grid_id_no_buffer.as_deref(), Some("5"));
        assert_eq!(result.grid_label_no_buffer.as_deref(), Some("旅游,商业"));
    }

    #[test]
    fn test_loads_gpkg_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let grid_path = dir.path().join("grids.gpkg");
        crate::source::write_test_gpkg(
            &grid_path,
            4326,
            "GEOGCS[\"WGS 84\"]",
            &[(
                Some(9),
                "港口",
                Some("工业"),
                vec![
                    (112.0, 22.0),
                    (112.01, 22.0),
                    (112.01, 22.01),
                    (112.0, 22.01),
                    (112.0, 22.0),
                ],
            )],
        );

        let m = GridMatcher::new(&MatcherConfig::new(&grid_path, dir.path().join("none.csv")));
        assert!(m.is_loaded());
        assert!(matches!(m.load_report().labels, LoadState::Missing { .. }));

        let found = m.locate(112.005, 22.005).unwrap();
        assert_eq!(found.exact[0].id, "9");
        assert_eq!(found.exact[0].attribute_label.as_deref(), Some("工业"));
        assert_eq!(found.to_result().grid_label_no_buffer, None);
    }

    #[test]
    fn test_dataset_without_usable_geometry_is_not_loaded() {
        let mut empty = rect(0, "A1", "城东", 112.0, 112.01);
        empty.geometry = MultiPolygon::new(vec![]);
        let m = GridMatcher::from_parts(
            GridDataset::new(vec![empty], Some(Crs::WGS84)),
            labels(),
            &config(),
        );
        assert!(!m.is_loaded());
        assert!(!m.load_report().grids.is_ok());
        assert!(matches!(m.load_report().grids, LoadState::Failed { .. }));

        let m = GridMatcher::from_parts(
            GridDataset::new(vec![], Some(Crs::WGS84)),
            labels(),
            &config(),
        );
        assert_eq!(m.is_loaded(), m.load_report().grids.is_ok());

        let m = matcher();
        assert!(m.is_loaded());
        assert_eq!(m.load_report().grids, LoadState::Provided { count: 2 });
    }

    #[test]
    fn test_corrupt_grid_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let grid_path = dir.path().join("grids.geojson");
        std::fs::write(&grid_path, "not json").unwrap();

        let m = GridMatcher::new(&MatcherConfig::new(&grid_path, dir.path().join("none.csv")));
        assert!(!m.is_loaded());
        assert!(matches!(m.load_report().grids, LoadState::Failed { .. }));
    }
}
