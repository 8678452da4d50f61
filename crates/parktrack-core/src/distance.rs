//! Distance and elevation between the user and the parked vehicle.
//!
//! The measurement itself is a set of pure functions. [`DistanceEngine`]
//! wraps them in a task that follows the [`LocationHub`], keeps the latest
//! [`DistanceReport`] on a watch channel and turns an explicit "go" request
//! into a single walking-route computation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use utoipa::ToSchema;

use crate::directions::{DirectionsProvider, TravelMode};
use crate::hub::{HubEvent, LocationHub};
use crate::location::{Coordinate, TrackerLocation, UserLocation};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Distances at or above this many meters are shown in kilometers.
pub const KILOMETER_THRESHOLD_M: f64 = 1000.0;

// =============================================================================
// PURE MEASUREMENT
// =============================================================================

/// Great-circle surface distance between two coordinates, in meters.
#[must_use]
pub fn surface_distance_m(from: Coordinate, to: Coordinate) -> f64 {
    let (lat1, lat2) = (from.latitude.to_radians(), to.latitude.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (to.longitude - from.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    // adding 0.0 folds -0.0 into 0.0
    (value * factor).round() / factor + 0.0
}

/// Render a number with at least one fractional digit (`850` → `"850.0"`).
fn format_decimal(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') || !value.is_finite() {
        text
    } else {
        format!("{text}.0")
    }
}

/// Human-readable distance, rounded to two decimals.
///
/// ```
/// use parktrack_core::distance::format_distance;
///
/// assert_eq!(format_distance(1500.0), "1.5 kilometers");
/// assert_eq!(format_distance(850.0), "850.0 meters");
/// ```
#[must_use]
pub fn format_distance(meters: f64) -> String {
    if meters >= KILOMETER_THRESHOLD_M {
        format!("{} kilometers", format_decimal(round_to(meters / 1000.0, 2)))
    } else {
        format!("{} meters", format_decimal(round_to(meters, 2)))
    }
}

/// Whether the vehicle is above or below the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ElevationDirection {
    /// The vehicle is higher up.
    Ascending,
    /// The vehicle is lower or level.
    Descending,
}

impl ElevationDirection {
    /// Direction for a signed elevation delta. Zero is not ascending.
    #[must_use]
    pub fn from_delta(delta_m: f64) -> Self {
        if delta_m > 0.0 {
            Self::Ascending
        } else {
            Self::Descending
        }
    }

    /// Arrow glyph shown next to the elevation.
    #[must_use]
    pub const fn arrow(self) -> &'static str {
        match self {
            Self::Ascending => "↑",
            Self::Descending => "↓",
        }
    }
}

/// Tracker altitude minus user altitude, rounded to three decimals.
#[must_use]
pub fn elevation_delta(user_altitude_m: f64, tracker_altitude_m: f64) -> f64 {
    round_to(tracker_altitude_m - user_altitude_m, 3)
}

/// A computed distance/elevation reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DistanceReport {
    /// Surface distance in meters.
    pub distance_m: f64,
    /// Formatted distance, e.g. `"1.5 kilometers"`.
    pub distance_text: String,
    /// Signed elevation delta in meters (vehicle minus user).
    pub elevation_delta_m: f64,
    /// Sign of the elevation delta.
    pub direction: ElevationDirection,
    /// Formatted elevation, e.g. `"↑ 12.5 meters"`.
    pub elevation_text: String,
}

impl DistanceReport {
    /// One-line summary combining distance and elevation.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{} • {}", self.distance_text, self.elevation_text)
    }
}

/// Measure from the user's fix to the tracker.
#[must_use]
pub fn measure(user: &UserLocation, tracker: &TrackerLocation) -> DistanceReport {
    let distance_m = surface_distance_m(user.coordinate(), tracker.coordinate());
    let elevation_delta_m = elevation_delta(user.altitude, tracker.altitude);
    let direction = ElevationDirection::from_delta(elevation_delta_m);

    DistanceReport {
        distance_m,
        distance_text: format_distance(distance_m),
        elevation_delta_m,
        direction,
        elevation_text: format!(
            "{} {} meters",
            direction.arrow(),
            format_decimal(elevation_delta_m)
        ),
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Control surface of a running [`DistanceEngine`].
#[derive(Debug, Clone)]
pub struct DistanceHandle {
    go: mpsc::Sender<()>,
    reports: watch::Receiver<Option<DistanceReport>>,
}

impl DistanceHandle {
    /// Ask for a walking route to the vehicle.
    ///
    /// The request fires once both locations are known. Returns `false` if
    /// the engine is no longer running.
    pub fn request_route(&self) -> bool {
        match self.go.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Latest distance report, if both locations are known.
    #[must_use]
    pub fn report(&self) -> Option<DistanceReport> {
        self.reports.borrow().clone()
    }

    /// Watch channel of distance reports.
    #[must_use]
    pub fn watch_reports(&self) -> watch::Receiver<Option<DistanceReport>> {
        self.reports.clone()
    }
}

/// Follows the hub and recomputes the [`DistanceReport`] on every change.
pub struct DistanceEngine<P> {
    hub: LocationHub,
    directions: Option<Arc<P>>,
    reports: watch::Sender<Option<DistanceReport>>,
    user: Option<UserLocation>,
    tracker: Option<TrackerLocation>,
    route_requested: bool,
}

impl<P: DirectionsProvider> DistanceEngine<P> {
    /// Start the engine on the current runtime.
    ///
    /// Pass `None` as `directions` to disable route computation; requests
    /// are then consumed and logged without effect.
    pub fn spawn(hub: LocationHub, directions: Option<Arc<P>>) -> (DistanceHandle, JoinHandle<()>) {
        let (go_tx, go_rx) = mpsc::channel(8);
        let (reports, reports_rx) = watch::channel(None);

        let subscription = hub.subscribe();
        let engine = Self {
            user: hub.user_location(),
            tracker: hub.tracker_location().map(|(location, _)| location),
            hub,
            directions,
            reports,
            route_requested: false,
        };
        let task = tokio::spawn(
            engine
                .run(subscription, go_rx)
                .instrument(tracing::info_span!("distance")),
        );

        (
            DistanceHandle {
                go: go_tx,
                reports: reports_rx,
            },
            task,
        )
    }

    async fn run(mut self, mut subscription: crate::hub::Subscription, mut go: mpsc::Receiver<()>) {
        self.recompute();
        let mut accepting_requests = true;

        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => break,
                },
                request = go.recv(), if accepting_requests => match request {
                    Some(()) => {
                        debug!("Route requested");
                        self.route_requested = true;
                        self.maybe_request_route();
                    }
                    None => accepting_requests = false,
                },
            }
        }

        debug!("Distance engine stopped");
    }

    fn on_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::TrackerLocationChanged(location) => self.tracker = Some(location),
            HubEvent::UserLocationChanged(location) => self.user = Some(location),
            HubEvent::RouteUpdated(_) => return,
        }
        self.recompute();
        self.maybe_request_route();
    }

    fn recompute(&self) {
        let (Some(user), Some(tracker)) = (&self.user, &self.tracker) else {
            return;
        };
        let report = measure(user, tracker);
        debug!(summary = %report.summary(), "Distance updated");
        self.reports.send_replace(Some(report));
    }

    fn maybe_request_route(&mut self) {
        if !self.route_requested {
            return;
        }
        let (Some(user), Some(tracker)) = (&self.user, &self.tracker) else {
            return;
        };
        // Consumed before the provider answers so new fixes don't re-fire.
        self.route_requested = false;

        let Some(directions) = self.directions.clone() else {
            warn!("Route requested but directions are disabled");
            return;
        };
        let origin = user.coordinate();
        let destination = tracker.coordinate();
        let hub = self.hub.clone();

        tokio::spawn(
            async move {
                match directions
                    .route(origin, destination, TravelMode::Walking)
                    .await
                {
                    Ok(route) => {
                        info!(
                            distance_m = route.distance_m,
                            steps = route.steps.len(),
                            "Walking route computed"
                        );
                        hub.publish_route(route);
                    }
                    Err(e) => warn!(error = %e, "Route request failed"),
                }
            }
            .instrument(tracing::info_span!("route_request")),
        );
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directions::{DirectionsError, Route, RouteStep};
    use crate::persist;
    use crate::store::LocationStore;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn user_at(latitude: f64, longitude: f64, altitude: f64) -> UserLocation {
        UserLocation {
            latitude,
            longitude,
            altitude,
            horizontal_accuracy: Some(5.0),
            timestamp: Utc::now(),
        }
    }

    fn tracker_at(latitude: f64, longitude: f64, altitude: f64) -> TrackerLocation {
        TrackerLocation::from_beacon(
            Coordinate::new(latitude, longitude).unwrap(),
            altitude,
            Utc::now(),
        )
    }

    #[test]
    fn test_format_switches_units_at_exactly_1000_m() {
        assert_eq!(format_distance(999.994), "999.99 meters");
        assert_eq!(format_distance(1000.0), "1.0 kilometers");
        assert_eq!(format_distance(1500.0), "1.5 kilometers");
        assert_eq!(format_distance(850.0), "850.0 meters");
        assert_eq!(format_distance(12_345.678), "12.35 kilometers");
        assert_eq!(format_distance(0.0), "0.0 meters");
    }

    #[test]
    fn test_elevation_direction_at_zero_is_descending() {
        assert_eq!(ElevationDirection::from_delta(0.0), ElevationDirection::Descending);
        assert_eq!(ElevationDirection::from_delta(0.001), ElevationDirection::Ascending);
        assert_eq!(ElevationDirection::from_delta(-0.001), ElevationDirection::Descending);
    }

    #[test]
    fn test_elevation_delta_rounds_to_three_places() {
        assert!((elevation_delta(10.0, 22.123_456) - 12.123).abs() < 1e-9);
        assert!((elevation_delta(22.5, 10.0) + 12.5).abs() < 1e-9);
        // A tiny negative difference rounds to a plain zero.
        assert_eq!(elevation_delta(1.000_1, 1.0).to_string(), "0");
    }

    #[test]
    fn test_surface_distance() {
        let a = Coordinate::new(0.0, 0.0).unwrap();
        assert!(surface_distance_m(a, a).abs() < f64::EPSILON);

        // One degree of longitude at the equator.
        let b = Coordinate::new(0.0, 1.0).unwrap();
        assert!((surface_distance_m(a, b) - 111_195.08).abs() < 1.0);

        // Paris to London, roughly 343.5 km.
        let paris = Coordinate::new(48.8566, 2.3522).unwrap();
        let london = Coordinate::new(51.5074, -0.1278).unwrap();
        let d = surface_distance_m(paris, london);
        assert!((d - 343_500.0).abs() < 1_000.0, "got {d}");
        assert!((surface_distance_m(london, paris) - d).abs() < 1e-6);
    }

    #[test]
    fn test_measure_builds_summary() {
        let user = user_at(0.0, 0.0, 10.0);
        let tracker = tracker_at(0.0, 0.0, 22.5);
        let report = measure(&user, &tracker);

        assert_eq!(report.distance_text, "0.0 meters");
        assert_eq!(report.direction, ElevationDirection::Ascending);
        assert_eq!(report.elevation_text, "↑ 12.5 meters");
        assert_eq!(report.summary(), "0.0 meters • ↑ 12.5 meters");

        let below = measure(&user_at(0.0, 0.0, 10.0), &tracker_at(0.0, 0.0, 7.0));
        assert_eq!(below.elevation_text, "↓ -3.0 meters");

        let level = measure(&user_at(0.0, 0.0, 4.0), &tracker_at(0.0, 0.0, 4.0));
        assert_eq!(level.direction, ElevationDirection::Descending);
        assert_eq!(level.elevation_text, "↓ 0.0 meters");
    }

    // -------------------------------------------------------------------------
    // Engine
    // -------------------------------------------------------------------------

    struct FakeDirections {
        calls: mpsc::UnboundedSender<(Coordinate, Coordinate)>,
        fail: bool,
    }

    impl DirectionsProvider for FakeDirections {
        async fn route(
            &self,
            origin: Coordinate,
            destination: Coordinate,
            _mode: TravelMode,
        ) -> Result<Route, DirectionsError> {
            let _ = self.calls.send((origin, destination));
            if self.fail {
                return Err(DirectionsError::NoRoute);
            }
            Ok(Route {
                polyline: vec![origin, destination],
                steps: vec![RouteStep {
                    instruction: "Arrive at your vehicle".into(),
                    distance_m: 0.0,
                }],
                distance_m: 10.0,
                duration_s: 8.0,
            })
        }
    }

    fn engine_with(
        fail: bool,
    ) -> (
        LocationHub,
        DistanceHandle,
        mpsc::UnboundedReceiver<(Coordinate, Coordinate)>,
    ) {
        let (persist, _task) = persist::spawn(LocationStore::in_memory());
        let hub = LocationHub::new(persist);
        let (calls, calls_rx) = mpsc::unbounded_channel();
        let (handle, _task) =
            DistanceEngine::spawn(hub.clone(), Some(Arc::new(FakeDirections { calls, fail })));
        (hub, handle, calls_rx)
    }

    async fn next_report(handle: &DistanceHandle) -> DistanceReport {
        let mut reports = handle.watch_reports();
        let report = tokio::time::timeout(
            Duration::from_secs(1),
            reports.wait_for(std::option::Option::is_some),
        )
        .await
        .expect("report in time")
        .expect("engine running")
        .clone();
        report.unwrap()
    }

    #[tokio::test]
    async fn test_no_report_until_both_locations_known() {
        let (hub, handle, _calls) = engine_with(false);
        hub.publish(tracker_at(0.0, 0.0, 0.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.report().is_none());

        hub.publish_user_location(user_at(0.0, 0.01, 0.0));
        let report = next_report(&handle).await;
        assert!(report.distance_text.ends_with("meters"));
    }

    #[tokio::test]
    async fn test_route_requested_fires_once_when_both_known() {
        let (hub, handle, mut calls) = engine_with(false);
        let mut events = hub.subscribe();

        assert!(handle.request_route());
        hub.publish(tracker_at(1.0, 1.0, 0.0));
        hub.publish_user_location(user_at(1.001, 1.0, 0.0));

        let (origin, destination) = tokio::time::timeout(Duration::from_secs(1), calls.recv())
            .await
            .unwrap()
            .unwrap();
        assert!((origin.latitude - 1.001).abs() < 1e-9);
        assert!((destination.latitude - 1.0).abs() < 1e-9);

        // A later fix must not trigger another request.
        hub.publish_user_location(user_at(1.002, 1.0, 0.0));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), calls.recv())
                .await
                .is_err()
        );

        let mut routes = 0;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), events.recv()).await
        {
            if let HubEvent::RouteUpdated(route) = event {
                assert_eq!(route.steps.len(), 1);
                routes += 1;
            }
        }
        assert_eq!(routes, 1);
        assert!(hub.route().is_some());
    }

    #[tokio::test]
    async fn test_failed_route_publishes_nothing_and_can_be_retried() {
        let (hub, handle, mut calls) = engine_with(true);
        hub.publish(tracker_at(1.0, 1.0, 0.0));
        hub.publish_user_location(user_at(1.001, 1.0, 0.0));
        next_report(&handle).await;

        handle.request_route();
        tokio::time::timeout(Duration::from_secs(1), calls.recv())
            .await
            .unwrap()
            .unwrap();

        handle.request_route();
        tokio::time::timeout(Duration::from_secs(1), calls.recv())
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(hub.route().is_none());
    }

    #[tokio::test]
    async fn test_request_without_provider_is_consumed() {
        let (persist, _task) = persist::spawn(LocationStore::in_memory());
        let hub = LocationHub::new(persist);
        let (handle, _task) = DistanceEngine::<FakeDirections>::spawn(hub.clone(), None);

        hub.publish(tracker_at(0.0, 0.0, 0.0));
        hub.publish_user_location(user_at(0.0, 0.0, 0.0));
        assert!(handle.request_route());
        next_report(&handle).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(hub.route().is_none());
    }

    #[tokio::test]
    async fn test_engine_starts_from_current_hub_state() {
        let (persist, _task) = persist::spawn(LocationStore::in_memory());
        let hub = LocationHub::new(persist);
        hub.publish(tracker_at(0.0, 0.0, 5.0));
        hub.publish_user_location(user_at(0.0, 0.0, 0.0));

        let (handle, _task) = DistanceEngine::<FakeDirections>::spawn(hub, None);
        let report = next_report(&handle).await;
        assert_eq!(report.direction, ElevationDirection::Ascending);
    }
}
