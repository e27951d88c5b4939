//! GeoJSON feature collection reader.

use std::fs;
use std::path::Path;

use geo::MultiPolygon;
use geojson::GeoJson;
use serde_json::Value;
use tracing::debug;

use super::{render_number, Feature, FeatureTable};
use crate::error::{GridError, Result};
use crate::models::Crs;

pub fn read_geojson(path: &Path) -> Result<FeatureTable> {
    let content = fs::read_to_string(path)?;
    let geojson: GeoJson = content.parse()?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(GridError::Geometry(
            "expected a GeoJSON FeatureCollection".to_string(),
        ));
    };

    let crs = collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(crs_from_member)
        .unwrap_or(Crs::WGS84);

    // Columns are the union of property keys, in first-seen order
    let mut columns: Vec<String> = Vec::new();
    for feature in &collection.features {
        if let Some(properties) = &feature.properties {
            for key in properties.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let features = collection
        .features
        .into_iter()
        .map(|feature| {
            let attributes = columns
                .iter()
                .map(|column| {
                    feature
                        .properties
                        .as_ref()
                        .and_then(|p| p.get(column))
                        .and_then(value_text)
                })
                .collect();
            let geometry = feature.geometry.and_then(|g| match to_multipolygon(g) {
                Ok(mp) => Some(mp),
                Err(e) => {
                    debug!("Unusable feature geometry: {}", e);
                    None
                }
            });
            Feature {
                attributes,
                geometry,
            }
        })
        .collect();

    Ok(FeatureTable {
        columns,
        features,
        crs: Some(crs),
    })
}

fn to_multipolygon(geometry: geojson::Geometry) -> Result<MultiPolygon<f64>> {
    let geometry: geo_types::Geometry<f64> = geometry.try_into()?;
    match geometry {
        geo_types::Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        geo_types::Geometry::MultiPolygon(mp) => Ok(mp),
        _ => Err(GridError::Geometry(
            "feature geometry is not polygonal".to_string(),
        )),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) => render_number(f),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Legacy `"crs": {"type": "name", "properties": {"name": "EPSG:32649"}}`
fn crs_from_member(member: &Value) -> Option<Crs> {
    let name = member.get("properties")?.get("name")?.as_str()?;
    if name.ends_with("CRS84") {
        return Some(Crs::WGS84);
    }
    let code: String = name
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    code.parse().ok().map(Crs::from_epsg)
}
