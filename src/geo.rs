use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{EARTH_RADIUS_KM, METERS_PER_DEGREE_LAT};

/// A point on the globe in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in kilometers (haversine).
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_KM * c
    }

    pub fn is_within_km(&self, center: &Coordinate, radius_km: f64) -> bool {
        self.distance_km(center) <= radius_km
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// Extent of a region in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub lat_delta: f64,
    pub lng_delta: f64,
}

impl Span {
    /// Positive, finite and no wider than the globe.
    pub fn is_valid(&self) -> bool {
        self.lat_delta.is_finite()
            && self.lng_delta.is_finite()
            && self.lat_delta > 0.0
            && self.lat_delta <= 180.0
            && self.lng_delta > 0.0
            && self.lng_delta <= 360.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub center: Coordinate,
    pub span: Span,
}

impl Region {
    /// Region centered on `center` covering the given north-south and
    /// east-west distances in meters.
    pub fn with_distance(center: Coordinate, lat_meters: f64, lng_meters: f64) -> Self {
        let lat_delta = lat_meters / METERS_PER_DEGREE_LAT;
        let meters_per_degree_lng = METERS_PER_DEGREE_LAT * center.lat.to_radians().cos();
        let lng_delta = if meters_per_degree_lng > f64::EPSILON {
            (lng_meters / meters_per_degree_lng).min(360.0)
        } else {
            360.0
        };

        Self {
            center,
            span: Span { lat_delta, lng_delta },
        }
    }
}

impl Default for Region {
    // Whole-world view before the first location fix
    fn default() -> Self {
        Self {
            center: Coordinate::new(0.0, 0.0),
            span: Span {
                lat_delta: 180.0,
                lng_delta: 360.0,
            },
        }
    }
}
