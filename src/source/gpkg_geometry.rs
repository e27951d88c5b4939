//! GeoPackage binary geometry decoding.
//!
//! The GeoPackage header is stripped here and the WKB payload is parsed
//! with the `wkb` crate. Only Polygon and MultiPolygon payloads are
//! accepted; Z and M ordinates are dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};

use geo::{Coord, LineString, MultiPolygon, Polygon};
use geo_traits::{
    CoordTrait, GeometryTrait, GeometryType, LineStringTrait, MultiPolygonTrait, PolygonTrait,
};

use crate::error::{GridError, Result};

const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOLYGON: u32 = 6;

/// Decode a GeoPackage geometry blob.
///
/// Returns `None` for blobs flagged as empty.
pub fn decode_gpkg_geometry(blob: &[u8]) -> Result<Option<MultiPolygon<f64>>> {
    if blob.len() < 8 || &blob[0..2] != b"GP" {
        return Err(malformed("missing GP magic"));
    }

    let flags = blob[3];
    if flags & 0x20 != 0 {
        return Err(malformed("extended GeoPackage geometry is not supported"));
    }

    let envelope_len = match (flags >> 1) & 0x07 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => return Err(malformed(&format!("invalid envelope indicator {}", other))),
    };

    if flags & 0x10 != 0 {
        return Ok(None);
    }

    let header_len = 8 + envelope_len;
    if blob.len() < header_len {
        return Err(malformed("truncated header"));
    }

    decode_wkb(&blob[header_len..]).map(Some)
}

/// Decode standard or extended WKB into a multipolygon.
///
/// Collections are rejected from the header alone, so nesting never
/// reaches the parser.
pub fn decode_wkb(bytes: &[u8]) -> Result<MultiPolygon<f64>> {
    match base_type(bytes)? {
        WKB_POLYGON | WKB_MULTIPOLYGON => {}
        other => {
            return Err(malformed(&format!(
                "unsupported geometry type {}, expected polygon",
                other
            )))
        }
    }

    // Coordinates are read lazily from the buffer, so conversion sits
    // under the same guard as parsing.
    catch_unwind(AssertUnwindSafe(|| -> Result<MultiPolygon<f64>> {
        let geometry = ::wkb::reader::read_wkb(bytes)?;
        to_multipolygon(&geometry)
    }))
    .map_err(|_| malformed("truncated WKB"))?
}

/// Geometry type code without dimension or EWKB flags.
fn base_type(bytes: &[u8]) -> Result<u32> {
    let (&order, rest) = bytes
        .split_first()
        .ok_or_else(|| malformed("empty WKB"))?;
    let raw: [u8; 4] = rest
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| malformed("truncated WKB header"))?;

    let code = match order {
        0 => u32::from_be_bytes(raw),
        1 => u32::from_le_bytes(raw),
        other => return Err(malformed(&format!("invalid byte order {}", other))),
    };
    Ok((code & 0x0FFF_FFFF) % 1000)
}

fn to_multipolygon(geometry: &impl GeometryTrait<T = f64>) -> Result<MultiPolygon<f64>> {
    match geometry.as_type() {
        GeometryType::Polygon(polygon) => Ok(MultiPolygon::new(
            to_polygon(polygon).into_iter().collect(),
        )),
        GeometryType::MultiPolygon(multi) => Ok(MultiPolygon::new(
            multi.polygons().filter_map(|p| to_polygon(&p)).collect(),
        )),
        _ => Err(malformed("expected polygon")),
    }
}

/// `None` for a polygon without rings.
fn to_polygon(polygon: &impl PolygonTrait<T = f64>) -> Option<Polygon<f64>> {
    let exterior = to_ring(&polygon.exterior()?);
    let interiors = polygon.interiors().map(|ring| to_ring(&ring)).collect();
    Some(Polygon::new(exterior, interiors))
}

fn to_ring(ring: &impl LineStringTrait<T = f64>) -> LineString<f64> {
    ring.coords()
        .map(|c| Coord { x: c.x(), y: c.y() })
        .collect()
}

fn malformed(msg: &str) -> GridError {
    GridError::Geometry(msg.to_string())
}
