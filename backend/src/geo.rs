use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::EARTH_RADIUS_METERS;
use crate::error::CoreError;

static WKT_POINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:SRID=\d+;)?POINT\s*\(\s*(-?[0-9.eE+-]+)\s+(-?[0-9.eE+-]+)\s*\)\s*$")
        .expect("static WKT pattern is valid")
});

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Builds a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoreError> {
        let coordinate = Self { latitude, longitude };
        coordinate.validate()?;
        Ok(coordinate)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CoreError::Invalid(format!("latitude out of range: {}", self.latitude)));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CoreError::Invalid(format!("longitude out of range: {}", self.longitude)));
        }
        Ok(())
    }

    /// Serializes as the `POINT(lon lat)` form the geography column accepts.
    pub fn to_wkt_point(&self) -> String {
        format!("POINT({} {})", self.longitude, self.latitude)
    }
}

/// Great-circle distance in meters (Haversine).
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Distance rounded to whole meters, the unit shown to users.
pub fn distance_meters_rounded(a: &Coordinate, b: &Coordinate) -> i64 {
    round_meters(distance_meters(a, b))
}

pub fn round_meters(meters: f64) -> i64 {
    meters.round() as i64
}

/// Initial bearing from `a` to `b`, in degrees within `[0, 360)`.
pub fn bearing_degrees(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Parses `POINT(lon lat)` (optionally prefixed with `SRID=n;`).
///
/// Returns `None` for anything malformed or out of range.
pub fn parse_wkt_point(raw: &str) -> Option<Coordinate> {
    let captures = WKT_POINT.captures(raw)?;
    let longitude: f64 = captures.get(1)?.as_str().parse().ok()?;
    let latitude: f64 = captures.get(2)?.as_str().parse().ok()?;
    Coordinate::new(latitude, longitude).ok()
}

pub fn format_distance(meters: i64) -> String {
    if meters < 1000 {
        format!("{}m", meters)
    } else {
        format!("{:.1}km", meters as f64 / 1000.0)
    }
}

/// Moves `origin` by `meters` along `bearing` degrees. Used to build fixtures at exact distances.
pub fn offset(origin: &Coordinate, meters: f64, bearing: f64) -> Coordinate {
    let delta = meters / EARTH_RADIUS_METERS;
    let theta = bearing.to_radians();
    let phi1 = origin.latitude.to_radians();
    let lambda1 = origin.longitude.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    Coordinate {
        latitude: phi2.to_degrees(),
        longitude: ((lambda2.to_degrees() + 540.0) % 360.0) - 180.0,
    }
}
