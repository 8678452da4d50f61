//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `location` - Vehicle location and user GPS fixes
//! - `route` - Distance, elevation and walking routes
//! - `link` - Tracker link state and rescan
//! - `events` - Server-Sent Events stream
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
pub mod events;
pub mod health;
pub mod link;
pub mod location;
pub mod openapi;
pub mod route;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                  - Health check
/// /api
/// ├── /location            - Vehicle location (GET), stored record (DELETE /stored)
/// ├── /user-location       - Submit the user's GPS fix
/// ├── /distance            - Distance and elevation to the vehicle
/// ├── /route               - Request (POST) or fetch (GET) a walking route
/// ├── /link                - Link state, rescan
/// ├── /events              - Server-Sent Events stream
/// └── /openapi.json        - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/location", location::router())
                .route("/user-location", post(location::submit_user_location))
                .route("/distance", get(route::get_distance))
                .nest("/route", route::router())
                .nest("/link", link::router())
                .route("/events", get(events::stream_events))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Router and state over in-memory core components.
#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use axum_test::TestServer;
    use parktrack_core::{
        persist, Central, CentralEvent, CharacteristicRef, DeviceLink, DistanceEngine, LinkConfig,
        LocationHub, LocationStore, OsrmDirections, PeripheralId, ServiceId,
    };
    use tokio::sync::mpsc;

    use super::create_router;
    use crate::state::{AppState, SharedState};

    /// A central with nothing in range.
    struct SilentCentral;

    impl Central for SilentCentral {
        fn start_scan(&mut self) {}
        fn stop_scan(&mut self) {}
        fn connect(&mut self, _: &PeripheralId) {}
        fn cancel_connection(&mut self, _: &PeripheralId) {}
        fn discover_services(&mut self, _: &PeripheralId) {}
        fn discover_characteristics(&mut self, _: &PeripheralId, _: ServiceId) {}
        fn read_value(&mut self, _: &PeripheralId, _: &CharacteristicRef) {}
        fn set_notify(&mut self, _: &PeripheralId, _: &CharacteristicRef, _: bool) {}
    }

    pub struct Options {
        pub with_link: bool,
        pub directions_enabled: bool,
        pub scan_timeout: Option<Duration>,
    }

    impl Default for Options {
        fn default() -> Self {
            Self {
                with_link: true,
                directions_enabled: true,
                scan_timeout: None,
            }
        }
    }

    pub struct Context {
        pub server: TestServer,
        pub state: SharedState,
        pub events: mpsc::UnboundedSender<CentralEvent>,
    }

    pub fn context(options: Options) -> Context {
        let (persist, _worker) = persist::spawn(LocationStore::in_memory());
        let hub = LocationHub::new(persist);
        let (distance, _engine) = DistanceEngine::<OsrmDirections>::spawn(hub.clone(), None);

        let (events, rx) = mpsc::unbounded_channel();
        let link = options.with_link.then(|| {
            let link = DeviceLink::new(
                SilentCentral,
                hub.clone(),
                LinkConfig {
                    scan_timeout: options.scan_timeout,
                    ..LinkConfig::default()
                },
            );
            let handle = link.handle();
            tokio::spawn(link.run(rx));
            handle
        });

        let state = AppState::new(hub, distance, link, options.directions_enabled);
        let server = TestServer::new(create_router(state.clone())).unwrap();
        Context {
            server,
            state,
            events,
        }
    }

    pub fn server_with(options: Options) -> (TestServer, SharedState) {
        let context = context(options);
        (context.server, context.state)
    }

    pub fn server() -> (TestServer, SharedState) {
        server_with(Options::default())
    }
}
