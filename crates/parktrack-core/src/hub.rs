//! Publish/subscribe distribution of location updates.
//!
//! The hub is the single point through which assembled tracker locations,
//! user GPS fixes and computed routes reach their consumers. Every tracker
//! location published here is also handed to the persistence context.
//!
//! At startup the hub may restore the previously stored location. A restored
//! value never replaces one that arrived live in the meantime: whichever
//! reaches the hub first under the lock wins, and a live value always
//! supersedes a restored one.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::directions::Route;
use crate::location::{TrackerLocation, UserLocation};
use crate::persist::PersistHandle;
use crate::store::StoreResult;

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 64;

/// Where the current tracker location came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LocationOrigin {
    /// Assembled from the beacon during this run.
    Live,
    /// Loaded from storage at startup.
    Restored,
}

/// A location update delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum HubEvent {
    /// The tracker's position changed.
    TrackerLocationChanged(TrackerLocation),
    /// The user's own GPS fix changed.
    UserLocationChanged(UserLocation),
    /// A new walking route is available.
    RouteUpdated(Route),
}

impl HubEvent {
    /// Stable event name, used for SSE event types.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TrackerLocationChanged(_) => "tracker_location_changed",
            Self::UserLocationChanged(_) => "user_location_changed",
            Self::RouteUpdated(_) => "route_updated",
        }
    }
}

/// A subscriber's view of the hub.
///
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// detaches it.
#[derive(Debug)]
pub struct Subscription {
    initial: Option<HubEvent>,
    events: broadcast::Receiver<HubEvent>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the hub is gone.
    ///
    /// If the subscriber fell behind, missed events are skipped and the
    /// newest retained ones are delivered.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        if let Some(event) = self.initial.take() {
            return Some(event);
        }
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged; skipping old events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next event if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<HubEvent> {
        if let Some(event) = self.initial.take() {
            return Some(event);
        }
        loop {
            match self.events.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    /// Detach from the hub.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

#[derive(Debug, Default)]
struct HubState {
    tracker: Option<(TrackerLocation, LocationOrigin)>,
    user: Option<UserLocation>,
    route: Option<Route>,
}

struct HubInner {
    state: Mutex<HubState>,
    events: broadcast::Sender<HubEvent>,
    persist: PersistHandle,
}

/// Distribution point for location and route updates.
#[derive(Clone)]
pub struct LocationHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for LocationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationHub")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Receives assembled tracker locations from the device link.
pub trait LocationSink: Send {
    /// Accept one assembled location.
    fn publish(&self, location: TrackerLocation);
}

impl LocationSink for LocationHub {
    fn publish(&self, location: TrackerLocation) {
        Self::publish(self, location);
    }
}

impl LocationHub {
    /// Create a hub persisting through `persist`.
    #[must_use]
    pub fn new(persist: PersistHandle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                events,
                persist,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a new subscriber.
    ///
    /// If the current tracker location was restored from storage and nothing
    /// live has arrived yet, it is delivered first as an initial value.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let state = self.state();
        let initial = match &state.tracker {
            Some((location, LocationOrigin::Restored)) => {
                Some(HubEvent::TrackerLocationChanged(location.clone()))
            }
            _ => None,
        };
        Subscription {
            initial,
            events: self.inner.events.subscribe(),
        }
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    /// Publish a freshly assembled tracker location.
    ///
    /// Queues the location for persistence and notifies every subscriber.
    pub fn publish(&self, location: TrackerLocation) {
        self.inner.persist.save(location.clone());

        let mut state = self.state();
        state.tracker = Some((location.clone(), LocationOrigin::Live));
        let delivered = self
            .inner
            .events
            .send(HubEvent::TrackerLocationChanged(location))
            .unwrap_or(0);
        drop(state);

        debug!(subscribers = delivered, "Tracker location published");
    }

    /// Publish a user GPS fix.
    pub fn publish_user_location(&self, location: UserLocation) {
        let mut state = self.state();
        state.user = Some(location.clone());
        let _ = self
            .inner
            .events
            .send(HubEvent::UserLocationChanged(location));
    }

    /// Publish a newly computed route.
    pub fn publish_route(&self, route: Route) {
        let mut state = self.state();
        state.route = Some(route.clone());
        let delivered = self
            .inner
            .events
            .send(HubEvent::RouteUpdated(route))
            .unwrap_or(0);
        drop(state);

        debug!(subscribers = delivered, "Route published");
    }

    /// Load the stored location and make it current unless a live one exists.
    ///
    /// Returns whether the restored location was applied.
    pub async fn restore(&self) -> bool {
        let Some(location) = self.inner.persist.load().await else {
            debug!("No stored tracker location to restore");
            return false;
        };

        let mut state = self.state();
        if state.tracker.is_some() {
            debug!("Live tracker location already present; stored location ignored");
            return false;
        }
        state.tracker = Some((location.clone(), LocationOrigin::Restored));
        let _ = self
            .inner
            .events
            .send(HubEvent::TrackerLocationChanged(location.clone()));
        drop(state);

        info!(
            latitude = location.latitude,
            longitude = location.longitude,
            recorded_at = %location.timestamp,
            "Restored stored tracker location"
        );
        true
    }

    /// Remove the persisted record. The in-memory location is unaffected.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be removed.
    pub async fn erase_stored(&self) -> StoreResult<bool> {
        self.inner.persist.erase().await
    }

    /// Current tracker location and its origin.
    #[must_use]
    pub fn tracker_location(&self) -> Option<(TrackerLocation, LocationOrigin)> {
        self.state().tracker.clone()
    }

    /// Latest user GPS fix.
    #[must_use]
    pub fn user_location(&self) -> Option<UserLocation> {
        self.state().user.clone()
    }

    /// Latest computed route.
    #[must_use]
    pub fn route(&self) -> Option<Route> {
        self.state().route.clone()
    }
}
