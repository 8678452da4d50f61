//! OpenAPI specification generation for the parktrack API.
//!
//! The generated document is served at `/api/openapi.json` and written to the
//! workspace root by the `gen-openapi` binary for client generation.

use axum::Json;
use parktrack_core::{
    Coordinate, DistanceReport, ElevationDirection, HubEvent, LinkState, LocationOrigin, Route,
    RouteStep, TrackerLocation, UserLocation,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::link::LinkStatusResponse;
use super::location::{EraseStoredResponse, LocationResponse};
use super::route::{DistanceResponse, RouteRequestResponse};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for parktrack.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "parktrack API",
        version = "0.1.0",
        description = r#"
# parktrack API

parktrack finds your parked car. A small Bluetooth Low Energy beacon left in
the vehicle streams its GPS position; this service keeps a link to it, keeps
the last known position across restarts, and tells you how far away and how
far up or down the vehicle is.

## Overview

1. **Location**: The vehicle's last known position, live from the beacon or
   restored from storage at startup
2. **User position**: Clients push their own GPS fix to get distance and
   elevation to the vehicle
3. **Routes**: An explicit "go" request computes a walking route once both
   positions are known
4. **Events**: A Server-Sent Events stream delivers every update as it happens

## Link lifecycle

The link scans for the tracker, connects, discovers the location
characteristic and subscribes to notifications. Any disconnect or discovery
failure goes back to scanning automatically. Only `unauthorized` and
`unsupported` need operator action.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local parktrack server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "location",
            description = "Vehicle position and the user's own GPS fix"
        ),
        (
            name = "route",
            description = "Distance, elevation and walking routes to the vehicle"
        ),
        (
            name = "link",
            description = "Bluetooth link to the tracker beacon"
        ),
        (
            name = "events",
            description = "Live update stream"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Location endpoints
        super::location::get_location,
        super::location::erase_stored,
        super::location::submit_user_location,
        // Route endpoints
        super::route::get_distance,
        super::route::request_route,
        super::route::get_route,
        // Link endpoints
        super::link::get_link,
        super::link::rescan,
        // Event stream
        super::events::stream_events,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            // Location types
            Coordinate,
            TrackerLocation,
            UserLocation,
            LocationOrigin,
            LocationResponse,
            EraseStoredResponse,
            // Route types
            DistanceReport,
            ElevationDirection,
            DistanceResponse,
            RouteRequestResponse,
            Route,
            RouteStep,
            // Link types
            LinkState,
            LinkStatusResponse,
            // Events
            HubEvent,
        )
    )
)]
pub struct ApiDoc;
