//! GeoPackage layer reader.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use super::gpkg_geometry::decode_gpkg_geometry;
use super::{render_number, Feature, FeatureTable};
use crate::error::{GridError, Result};
use crate::models::Crs;

/// A feature layer registered in `gpkg_geometry_columns`.
#[derive(Debug, Clone)]
struct Layer {
    table: String,
    geometry_column: String,
    srs_id: i32,
}

/// Read a feature layer. The first registered layer is used unless one is
/// named explicitly.
pub fn read_gpkg(path: &Path, layer: Option<&str>) -> Result<FeatureTable> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let layer = select_layer(&conn, layer)?;
    info!(
        "Reading GeoPackage layer '{}' (geometry column '{}', srs {})",
        layer.table, layer.geometry_column, layer.srs_id
    );

    let crs = layer_crs(&conn, layer.srs_id)?;

    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(&layer.table)))?;
    let all_columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let geometry_idx = all_columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(&layer.geometry_column))
        .ok_or_else(|| {
            GridError::Geometry(format!(
                "geometry column '{}' not found in '{}'",
                layer.geometry_column, layer.table
            ))
        })?;

    let columns: Vec<String> = all_columns
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != geometry_idx)
        .map(|(_, c)| c.clone())
        .collect();

    let mut features = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut attributes = Vec::with_capacity(columns.len());
        let mut geometry = None;

        for i in 0..all_columns.len() {
            let value = row.get_ref(i)?;
            if i == geometry_idx {
                geometry = match value {
                    ValueRef::Blob(blob) => match decode_gpkg_geometry(blob) {
                        Ok(mp) => mp,
                        Err(e) => {
                            debug!("Undecodable geometry in row {}: {}", features.len(), e);
                            None
                        }
                    },
                    _ => None,
                };
            } else {
                attributes.push(value_text(value));
            }
        }

        features.push(Feature {
            attributes,
            geometry,
        });
    }

    Ok(FeatureTable {
        columns,
        features,
        crs,
    })
}

fn select_layer(conn: &Connection, wanted: Option<&str>) -> Result<Layer> {
    let mut stmt = conn.prepare(
        "SELECT table_name, column_name, srs_id FROM gpkg_geometry_columns ORDER BY table_name",
    )?;
    let layers: Vec<Layer> = stmt
        .query_map([], |row| {
            Ok(Layer {
                table: row.get(0)?,
                geometry_column: row.get(1)?,
                srs_id: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<_, _>>()?;

    let found = match wanted {
        Some(name) => layers.iter().find(|l| l.table == name).cloned(),
        None => {
            if layers.len() > 1 {
                warn!(
                    "GeoPackage has {} layers, using '{}'",
                    layers.len(),
                    layers[0].table
                );
            }
            layers.first().cloned()
        }
    };

    found.ok_or_else(|| GridError::MissingLayer(wanted.unwrap_or("*").to_string()))
}

/// Resolve a layer's CRS from `gpkg_spatial_ref_sys`.
///
/// srs_id 0 and -1 are the GeoPackage "undefined" systems and yield `None`.
fn layer_crs(conn: &Connection, srs_id: i32) -> Result<Option<Crs>> {
    if srs_id == 0 || srs_id == -1 {
        return Ok(None);
    }

    let row: Option<(String, String, i32)> = conn
        .query_row(
            "SELECT definition, organization, organization_coordsys_id \
             FROM gpkg_spatial_ref_sys WHERE srs_id = ?1",
            [srs_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((definition, organization, code)) = row else {
        warn!("srs_id {} is not registered in gpkg_spatial_ref_sys", srs_id);
        return Ok(None);
    };

    let epsg = organization.eq_ignore_ascii_case("EPSG").then_some(code);
    Ok(crs_from_definition(&definition, epsg))
}

fn crs_from_definition(definition: &str, epsg: Option<i32>) -> Option<Crs> {
    let head = definition.trim_start().to_ascii_uppercase();
    if head.starts_with("GEOGCS") || head.starts_with("GEOGCRS") || head.starts_with("GEODCRS") {
        Some(Crs::Geographic { epsg })
    } else if head.starts_with("PROJCS") || head.starts_with("PROJCRS") {
        Some(match epsg.map(Crs::from_epsg) {
            Some(crs @ Crs::Projected { .. }) => crs,
            _ => Crs::Projected { epsg, utm: None },
        })
    } else {
        epsg.map(Crs::from_epsg)
    }
}

fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(render_number(f)),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::gpkg_geometry::tests::gpkg_blob;

    /// Minimal GeoPackage with one grid layer.
    pub(crate) fn write_gpkg(
        path: &Path,
        srs_id: i32,
        definition: &str,
        rows: &[(Option<i64>, &str, Option<&str>, Vec<(f64, f64)>)],
    ) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE gpkg_spatial_ref_sys (
                srs_name TEXT NOT NULL, srs_id INTEGER PRIMARY KEY,
                organization TEXT NOT NULL, organization_coordsys_id INTEGER NOT NULL,
                definition TEXT NOT NULL, description TEXT);
             CREATE TABLE gpkg_geometry_columns (
                table_name TEXT NOT NULL, column_name TEXT NOT NULL,
                geometry_type_name TEXT NOT NULL, srs_id INTEGER NOT NULL,
                z TINYINT NOT NULL, m TINYINT NOT NULL);
             CREATE TABLE grids (fid INTEGER PRIMARY KEY AUTOINCREMENT, geom BLOB,
                \"序号\" INTEGER, \"中文名\" TEXT, \"场景\" TEXT);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO gpkg_spatial_ref_sys VALUES ('crs', ?1, 'EPSG', ?1, ?2, NULL)",
            rusqlite::params![srs_id, definition],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO gpkg_geometry_columns VALUES ('grids', 'geom', 'MULTIPOLYGON', ?1, 0, 0)",
            [srs_id],
        )
        .unwrap();
        for (id, name, scene, ring) in rows {
            conn.execute(
                "INSERT INTO grids (geom, \"序号\", \"中文名\", \"场景\") VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![gpkg_blob(srs_id, ring), id, name, scene],
            )
            .unwrap();
        }
    }

    fn square(x: f64, y: f64, size: f64) -> Vec<(f64, f64)> {
        vec![
            (x, y),
            (x + size, y),
            (x + size, y + size),
            (x, y + size),
            (x, y),
        ]
    }

    #[test]
    fn test_reads_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grids.gpkg");
        write_gpkg(
            &path,
            4326,
            "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\"]]",
            &[
                (Some(1), "城东", Some("商务"), square(112.0, 22.0, 0.01)),
                (None, "无号", None, square(112.1, 22.0, 0.01)),
            ],
        );

        let table = read_gpkg(&path, None).unwrap();
        assert_eq!(table.columns, vec!["fid", "序号", "中文名", "场景"]);
        assert_eq!(table.crs, Some(Crs::Geographic { epsg: Some(4326) }));
        assert_eq!(table.features.len(), 2);
        assert_eq!(table.features[0].attributes[1].as_deref(), Some("1"));
        assert_eq!(table.features[0].attributes[3].as_deref(), Some("商务"));
        assert_eq!(table.features[1].attributes[1], None);
        assert!(table.features.iter().all(|f| f.geometry.is_some()));
    }

    #[test]
    fn test_named_layer_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grids.gpkg");
        write_gpkg(&path, 4326, "GEOGCS[\"WGS 84\"]", &[]);
        assert!(matches!(
            read_gpkg(&path, Some("roads")),
            Err(GridError::MissingLayer(_))
        ));
    }

    #[test]
    fn test_undefined_srs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grids.gpkg");
        write_gpkg(&path, 0, "undefined", &[]);
        assert_eq!(read_gpkg(&path, None).unwrap().crs, None);
    }

    #[test]
    fn test_crs_from_definition() {
        assert!(matches!(
            crs_from_definition("PROJCS[\"WGS 84 / UTM zone 49N\"]", Some(32649)),
            Some(Crs::Projected { utm: Some(_), .. })
        ));
        assert!(matches!(
            crs_from_definition("PROJCS[\"Local\"]", None),
            Some(Crs::Projected { utm: None, .. })
        ));
        assert_eq!(
            crs_from_definition("GEOGCRS[\"China Geodetic Coordinate System 2000\"]", Some(4490)),
            Some(Crs::Geographic { epsg: Some(4490) })
        );
        assert_eq!(crs_from_definition("undefined", None), None);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("grids"), "\"grids\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
