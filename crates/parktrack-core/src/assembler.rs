//! Reassembly of a full position from independently received frames.
//!
//! Each notification carries one of longitude, latitude or altitude. The
//! assembler keeps the most recent value per field in a [`PartialFrame`] and
//! emits a [`TrackerLocation`] as soon as all three are present, clearing the
//! accumulator in the same step.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::frame::{FieldTag, Frame};
use crate::location::{Coordinate, TrackerLocation};

/// Raw field values awaiting assembly (still in wire units).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartialFrame {
    longitude: Option<f64>,
    latitude: Option<f64>,
    altitude: Option<f64>,
}

/// A complete set of raw fields taken out of a [`PartialFrame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompleteFrame {
    /// Longitude, ×10^7 degrees.
    pub longitude: f64,
    /// Latitude, ×10^7 degrees.
    pub latitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
}

impl PartialFrame {
    /// Store a value for `tag`, replacing any earlier value for that tag.
    pub fn set(&mut self, tag: FieldTag, value: f64) {
        let slot = match tag {
            FieldTag::Longitude => &mut self.longitude,
            FieldTag::Latitude => &mut self.latitude,
            FieldTag::Altitude => &mut self.altitude,
        };
        *slot = Some(value);
    }

    /// Whether every field holds a value.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.longitude.is_some() && self.latitude.is_some() && self.altitude.is_some()
    }

    /// Whether no field holds a value.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.longitude.is_none() && self.latitude.is_none() && self.altitude.is_none()
    }

    /// If complete, return all three values and reset every slot.
    ///
    /// An incomplete frame is left untouched.
    pub fn take_and_reset(&mut self) -> Option<CompleteFrame> {
        match (self.longitude, self.latitude, self.altitude) {
            (Some(longitude), Some(latitude), Some(altitude)) => {
                *self = Self::default();
                Some(CompleteFrame {
                    longitude,
                    latitude,
                    altitude,
                })
            }
            _ => None,
        }
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Stateful accumulator turning a stream of frames into locations.
pub struct LocationAssembler {
    partial: PartialFrame,
    clock: Clock,
}

impl Default for LocationAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocationAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationAssembler")
            .field("partial", &self.partial)
            .finish_non_exhaustive()
    }
}

impl LocationAssembler {
    /// Create an assembler stamping locations with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// Create an assembler with a custom timestamp source.
    #[must_use]
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            partial: PartialFrame::default(),
            clock: Box::new(clock),
        }
    }

    /// Feed one parsed frame. Returns a location when the set completes.
    pub fn ingest(&mut self, frame: Frame) -> Option<TrackerLocation> {
        self.ingest_raw(frame.tag, frame.value)
    }

    /// Feed one raw tagged value. Returns a location when the set completes.
    ///
    /// A completed set whose coordinates fall outside the valid range is
    /// discarded; the slots are cleared either way.
    pub fn ingest_raw(&mut self, tag: FieldTag, value: f64) -> Option<TrackerLocation> {
        self.partial.set(tag, value);
        debug!(%tag, value, complete = self.partial.is_complete(), "Frame ingested");

        let complete = self.partial.take_and_reset()?;
        match Coordinate::from_scaled(complete.latitude, complete.longitude) {
            Ok(coordinate) => Some(TrackerLocation::from_beacon(
                coordinate,
                complete.altitude,
                (self.clock)(),
            )),
            Err(e) => {
                warn!(error = %e, "Discarding assembled location with invalid coordinate");
                None
            }
        }
    }

    /// Current accumulator contents.
    #[must_use]
    pub const fn partial(&self) -> &PartialFrame {
        &self.partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 3, 30, 0).unwrap()
    }

    #[test]
    fn test_emits_once_all_three_arrive() {
        let mut assembler = LocationAssembler::with_clock(fixed_clock);

        assert!(assembler
            .ingest_raw(FieldTag::Latitude, 500_000_000.0)
            .is_none());
        assert!(assembler
            .ingest_raw(FieldTag::Longitude, -1_000_000_000.0)
            .is_none());
        let location = assembler.ingest_raw(FieldTag::Altitude, 12.5).unwrap();

        assert!((location.latitude - 50.0).abs() < 1e-9);
        assert!((location.longitude + 100.0).abs() < 1e-9);
        assert!((location.altitude - 12.5).abs() < 1e-9);
        assert!((location.horizontal_accuracy - 1.5).abs() < f64::EPSILON);
        assert!((location.vertical_accuracy - 3.5).abs() < f64::EPSILON);
        assert_eq!(location.speed, None);
        assert_eq!(location.course, None);
        assert_eq!(location.timestamp, fixed_clock());
        assert!(assembler.partial().is_empty());
    }

    #[test]
    fn test_no_second_emission_from_partial_set() {
        let mut assembler = LocationAssembler::with_clock(fixed_clock);
        assembler.ingest_raw(FieldTag::Latitude, 1.0);
        assembler.ingest_raw(FieldTag::Longitude, 2.0);
        assert!(assembler.ingest_raw(FieldTag::Altitude, 3.0).is_some());

        assert!(assembler.ingest_raw(FieldTag::Latitude, 4.0).is_none());
        assert!(assembler.ingest_raw(FieldTag::Longitude, 5.0).is_none());
        assert!(!assembler.partial().is_complete());
    }

    #[test]
    fn test_last_write_wins_per_tag() {
        let mut assembler = LocationAssembler::with_clock(fixed_clock);
        assembler.ingest_raw(FieldTag::Latitude, 100_000_000.0);
        assembler.ingest_raw(FieldTag::Latitude, 200_000_000.0);
        assembler.ingest_raw(FieldTag::Altitude, 1.0);
        assembler.ingest_raw(FieldTag::Altitude, 2.0);

        let location = assembler.ingest_raw(FieldTag::Longitude, 0.0).unwrap();
        assert!((location.latitude - 20.0).abs() < 1e-9);
        assert!((location.altitude - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_set_is_discarded_and_cleared() {
        let mut assembler = LocationAssembler::with_clock(fixed_clock);
        assembler.ingest_raw(FieldTag::Latitude, 1_000_000_000.0); // 100 degrees
        assembler.ingest_raw(FieldTag::Longitude, 0.0);
        assert!(assembler.ingest_raw(FieldTag::Altitude, 0.0).is_none());
        assert!(assembler.partial().is_empty());
    }

    #[test]
    fn test_partial_frame_take_leaves_incomplete_untouched() {
        let mut partial = PartialFrame::default();
        partial.set(FieldTag::Altitude, 9.0);
        assert!(partial.take_and_reset().is_none());
        assert!(!partial.is_empty());

        partial.set(FieldTag::Latitude, 1.0);
        partial.set(FieldTag::Longitude, 2.0);
        assert!(partial.is_complete());
        assert_eq!(
            partial.take_and_reset(),
            Some(CompleteFrame {
                longitude: 2.0,
                latitude: 1.0,
                altitude: 9.0
            })
        );
        assert!(partial.is_empty());
    }
}
