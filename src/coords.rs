//! Local planar frame around a geodetic origin.
//!
//! Equirectangular approximation, accurate to a few centimeters over the
//! extent of a building. Longitude maps to x (east), latitude to y (north).

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

use crate::config::GeoOrigin;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinateTransform {
    origin_lon: f64,
    origin_lat: f64,
}

impl CoordinateTransform {
    /// Inputs must be finite; callers validate before construction.
    pub fn new(origin_lon: f64, origin_lat: f64) -> Self {
        Self { origin_lon, origin_lat }
    }

    pub fn from_origin(origin: GeoOrigin) -> Self {
        Self::new(origin.longitude, origin.latitude)
    }

    /// Move the frame. Local coordinates computed before the call are stale
    /// afterwards; the session re-anchors its filter when this happens.
    pub fn set_origin(&mut self, origin_lon: f64, origin_lat: f64) {
        self.origin_lon = origin_lon;
        self.origin_lat = origin_lat;
    }

    /// (lon, lat) of the frame origin.
    pub fn origin(&self) -> (f64, f64) {
        (self.origin_lon, self.origin_lat)
    }

    /// Geodetic (degrees) to local (meters).
    pub fn to_local(&self, lon: f64, lat: f64) -> (f64, f64) {
        let d_lon = (lon - self.origin_lon).to_radians();
        let d_lat = (lat - self.origin_lat).to_radians();
        let x = d_lon * self.origin_lat.to_radians().cos() * EARTH_RADIUS_M;
        let y = d_lat * EARTH_RADIUS_M;
        (x, y)
    }

    /// Local (meters) to geodetic (degrees).
    pub fn to_geo(&self, x: f64, y: f64) -> (f64, f64) {
        let d_lon = x / (EARTH_RADIUS_M * self.origin_lat.to_radians().cos());
        let d_lat = y / EARTH_RADIUS_M;
        (self.origin_lon + d_lon.to_degrees(), self.origin_lat + d_lat.to_degrees())
    }
}

/// Great-circle distance between two (lon, lat) points in meters.
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    Point::new(a.0, a.1).haversine_distance(&Point::new(b.0, b.1))
}
