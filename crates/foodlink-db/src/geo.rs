//! Spatial helpers for the donation geo index.
//!
//! The index itself is the `(status, latitude, longitude)` B-tree on the
//! donations table: a bounding box narrows the scan, then the exact
//! great-circle distance decides membership and order.

use std::f64::consts::PI;

use foodlink_types::models::GeoPoint;

/// Mean Earth radius in meters (spherical model).
pub const EARTH_RADIUS_M: f64 = 6371e3;

/// Great-circle distance in meters between two points given in degrees.
///
/// Degrees are converted as `x * PI / 180.0`, not with `to_radians()`, which
/// rounds differently; distances must match the legacy ranking bit for bit.
pub fn haversine_m(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let phi1 = from.latitude * PI / 180.0;
    let phi2 = to.latitude * PI / 180.0;
    let d_phi = (to.latitude - from.latitude) * PI / 180.0;
    let d_lambda = (to.longitude - from.longitude) * PI / 180.0;

    let a = (d_phi / 2.0).sin() * (d_phi / 2.0).sin()
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin() * (d_lambda / 2.0).sin();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Degree box containing every point within `radius_m` of an origin.
/// Longitude bounds are dropped near the poles and across the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub lng: Option<(f64, f64)>,
}

impl BoundingBox {
    pub fn around(origin: &GeoPoint, radius_m: f64) -> Self {
        let d_lat = (radius_m / EARTH_RADIUS_M).to_degrees();
        let min_lat = (origin.latitude - d_lat).max(-90.0);
        let max_lat = (origin.latitude + d_lat).min(90.0);

        let lng = if min_lat <= -90.0 || max_lat >= 90.0 {
            None
        } else {
            let widest = origin.latitude.abs() + d_lat;
            let d_lng = d_lat / widest.to_radians().cos();
            let (lo, hi) = (origin.longitude - d_lng, origin.longitude + d_lng);
            if lo < -180.0 || hi > 180.0 { None } else { Some((lo, hi)) }
        };

        Self { min_lat, max_lat, lng }
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        if p.latitude < self.min_lat || p.latitude > self.max_lat {
            return false;
        }
        match self.lng {
            Some((lo, hi)) => p.longitude >= lo && p.longitude <= hi,
            None => true,
        }
    }
}
