//! WGS84 <-> UTM transverse Mercator projection.
//!
//! Uses the Krüger series to third order in the third flattening, which is
//! accurate to well below a millimeter inside a zone and degrades slowly
//! outside it.

use geo::{Coord, MapCoords, MultiPolygon};

use crate::error::{GridError, Result};

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// A WGS84 UTM zone (1..=60) and hemisphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    number: u8,
    north: bool,
}

impl UtmZone {
    pub fn new(number: u8, north: bool) -> Option<Self> {
        (1..=60).contains(&number).then_some(Self { number, north })
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn is_north(&self) -> bool {
        self.north
    }

    /// EPSG code of the zone (326xx north, 327xx south)
    pub fn epsg(&self) -> i32 {
        let base = if self.north { 32600 } else { 32700 };
        base + i32::from(self.number)
    }

    /// Central meridian in degrees
    pub fn central_meridian(&self) -> f64 {
        f64::from(self.number) * 6.0 - 183.0
    }

    /// Project a geographic coordinate (degrees) to easting/northing (meters).
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let s = Series::get();
        let phi = lat.to_radians();
        let dlam = (lon - self.central_meridian()).to_radians();

        let e = s.e;
        let t = (phi.sin().atanh() - e * (e * phi.sin()).atanh()).sinh();
        let xi_p = t.atan2(dlam.cos());
        let eta_p = (dlam.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, alpha) in s.alpha.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        let easting = FALSE_EASTING + K0 * s.big_a * eta;
        let northing = self.false_northing() + K0 * s.big_a * xi;
        (easting, northing)
    }

    /// Unproject easting/northing (meters) to a geographic coordinate (degrees).
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let s = Series::get();
        let xi = (northing - self.false_northing()) / (K0 * s.big_a);
        let eta = (easting - FALSE_EASTING) / (K0 * s.big_a);

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, beta) in s.beta.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut phi = chi;
        for (j, delta) in s.delta.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            phi += delta * (k * chi).sin();
        }

        let lon = self.central_meridian() + eta_p.sinh().atan2(xi_p.cos()).to_degrees();
        (lon, phi.to_degrees())
    }

    /// Whether a longitude lies within the zone band widened by `margin` degrees.
    pub fn covers_longitude(&self, lon: f64, margin: f64) -> bool {
        (lon - self.central_meridian()).abs() <= 3.0 + margin
    }

    /// Project every vertex of a geographic multipolygon into the zone.
    pub fn project(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        geometry.try_map_coords(|c: Coord<f64>| {
            let (x, y) = self.forward(c.x, c.y);
            finite(x, y, c)
        })
    }

    /// Inverse of [`Self::project`].
    pub fn unproject(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        geometry.try_map_coords(|c: Coord<f64>| {
            let (x, y) = self.inverse(c.x, c.y);
            finite(x, y, c)
        })
    }

    fn false_northing(&self) -> f64 {
        if self.north {
            0.0
        } else {
            FALSE_NORTHING_SOUTH
        }
    }
}

fn finite(x: f64, y: f64, source: Coord<f64>) -> Result<Coord<f64>> {
    if x.is_finite() && y.is_finite() {
        Ok(Coord { x, y })
    } else {
        Err(GridError::Projection(format!(
            "non-finite result for ({}, {})",
            source.x, source.y
        )))
    }
}

/// Ellipsoid-derived series coefficients.
struct Series {
    e: f64,
    big_a: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

impl Series {
    fn get() -> &'static Series {
        static SERIES: std::sync::OnceLock<Series> = std::sync::OnceLock::new();
        SERIES.get_or_init(|| {
            let n = F / (2.0 - F);
            let n2 = n * n;
            let n3 = n2 * n;
            Series {
                e: (F * (2.0 - F)).sqrt(),
                big_a: A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
                alpha: [
                    n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                    13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                    61.0 * n3 / 240.0,
                ],
                beta: [
                    n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                    n2 / 48.0 + n3 / 15.0,
                    17.0 * n3 / 480.0,
                ],
                delta: [
                    2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                    7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                    56.0 * n3 / 15.0,
                ],
            }
        })
    }
}
