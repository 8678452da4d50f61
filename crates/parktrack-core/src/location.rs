//! Location value types shared by every component.
//!
//! [`TrackerLocation`] is the position reconstructed from the beacon, and
//! [`UserLocation`] is a GPS fix supplied by the host device. Both are plain
//! immutable values; nothing in the crate mutates one after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Fixed-point scale used for latitude/longitude on the wire.
pub const COORDINATE_SCALE: f64 = 10_000_000.0;

/// Horizontal accuracy reported for every beacon fix, in meters.
///
/// The wire protocol does not carry accuracy, so the tracker's nominal GPS
/// accuracy is used.
pub const TRACKER_HORIZONTAL_ACCURACY_M: f64 = 1.5;

/// Vertical accuracy reported for every beacon fix, in meters.
pub const TRACKER_VERTICAL_ACCURACY_M: f64 = 3.5;

/// Error returned when a coordinate is outside the WGS84 domain.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    /// Latitude outside `[-90, 90]` or not finite.
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),

    /// Longitude outside `[-180, 180]` or not finite.
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
}

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"latitude": 52.520_008, "longitude": 13.404_954}))]
pub struct Coordinate {
    /// Latitude in degrees, `[-90, 90]`.
    pub latitude: f64,

    /// Longitude in degrees, `[-180, 180]`.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a validated coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] if either component is out of range.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::Latitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Decode a coordinate from the wire's ×10^7 fixed-point representation.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] if the decoded value is out of range.
    pub fn from_scaled(raw_latitude: f64, raw_longitude: f64) -> Result<Self, CoordinateError> {
        Self::new(
            raw_latitude / COORDINATE_SCALE,
            raw_longitude / COORDINATE_SCALE,
        )
    }
}

/// Last known position of the parked vehicle's beacon.
///
/// Serialized with camelCase keys; this is also the persisted record layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "latitude": 50.0,
    "longitude": -100.0,
    "altitude": 12.5,
    "horizontalAccuracy": 1.5,
    "verticalAccuracy": 3.5,
    "speed": null,
    "course": null,
    "timestamp": "2025-01-15T03:30:00Z"
}))]
pub struct TrackerLocation {
    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// Altitude in meters.
    pub altitude: f64,

    /// Horizontal accuracy in meters.
    pub horizontal_accuracy: f64,

    /// Vertical accuracy in meters.
    pub vertical_accuracy: f64,

    /// Ground speed in m/s, if known.
    pub speed: Option<f64>,

    /// Course over ground in degrees, if known.
    pub course: Option<f64>,

    /// Capture time (UTC).
    pub timestamp: DateTime<Utc>,
}

impl TrackerLocation {
    /// Build a beacon fix with the tracker's fixed accuracy values.
    #[must_use]
    pub fn from_beacon(
        coordinate: Coordinate,
        altitude: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            altitude,
            horizontal_accuracy: TRACKER_HORIZONTAL_ACCURACY_M,
            vertical_accuracy: TRACKER_VERTICAL_ACCURACY_M,
            speed: None,
            course: None,
            timestamp,
        }
    }

    /// The horizontal position of this fix.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// A GPS fix of the user's own device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserLocation {
    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// Altitude in meters.
    #[serde(default)]
    pub altitude: f64,

    /// Horizontal accuracy in meters, if the fix reports one.
    #[serde(default)]
    pub horizontal_accuracy: Option<f64>,

    /// Time of the fix; defaults to the time it was received.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl UserLocation {
    /// The horizontal position of this fix.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Check that the fix lies within the valid coordinate domain.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] for out-of-range components.
    pub fn validate(&self) -> Result<(), CoordinateError> {
        Coordinate::new(self.latitude, self.longitude).map(|_| ())
    }
}
