//! Application state shared across handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parktrack_core::{DistanceHandle, LinkHandle, LocationHub};

/// Shared application state.
pub type SharedState = Arc<AppState>;

/// Handles to the running core components.
#[derive(Debug)]
pub struct AppState {
    /// Location distribution point.
    pub hub: LocationHub,

    /// Distance reports and the route trigger.
    pub distance: DistanceHandle,

    /// The tracker link, if a Bluetooth binding is running.
    pub link: Option<LinkHandle>,

    /// Whether a directions provider is configured.
    pub directions_enabled: bool,

    /// When the server started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Bundle the running components into shareable state.
    #[must_use]
    pub fn new(
        hub: LocationHub,
        distance: DistanceHandle,
        link: Option<LinkHandle>,
        directions_enabled: bool,
    ) -> SharedState {
        Arc::new(Self {
            hub,
            distance,
            link,
            directions_enabled,
            started_at: Utc::now(),
        })
    }
}
