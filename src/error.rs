//! Domain errors

use std::time::Duration;
use thiserror::Error;

use crate::geo::Coordinate;

/// Errors raised by a geospatial index client.
#[derive(Debug, Error)]
pub enum GeoIndexError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("geospatial index unavailable: {0}")]
    Unavailable(String),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(Coordinate),

    #[error("invalid query radius: {0} km")]
    InvalidRadius(f64),
}

impl GeoIndexError {
    /// Whether repeating the call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }
}

/// Errors raised while turning index traffic into sightings.
#[derive(Debug, Error)]
pub enum SightingError {
    #[error("malformed sighting key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    #[error(transparent)]
    Index(#[from] GeoIndexError),
}
