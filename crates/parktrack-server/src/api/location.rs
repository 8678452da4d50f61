//! Tracker and user location endpoints.
//!
//! The tracker location is read-only over HTTP; it only ever comes from the
//! beacon (or from storage at startup). User GPS fixes are pushed by the
//! client and feed the distance engine.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use parktrack_core::{LocationOrigin, TrackerError, TrackerLocation, UserLocation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the tracker location router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_location))
        .route("/stored", delete(erase_stored))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current tracker location.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LocationResponse {
    /// The last known position of the vehicle.
    pub location: TrackerLocation,

    /// Whether it arrived from the beacon during this run or was restored.
    pub origin: LocationOrigin,
}

/// Result of erasing the stored location.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"removed": true}))]
pub struct EraseStoredResponse {
    /// Whether a stored record existed and was removed.
    pub removed: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the last known tracker location.
#[utoipa::path(
    get,
    path = "/api/location",
    tag = "location",
    operation_id = "getTrackerLocation",
    summary = "Get the parked vehicle's location",
    description = "Returns the most recent position reported by the tracker beacon. \
        Right after startup this may be the position restored from storage \
        (`origin: restored`) until the beacon reports again.",
    responses(
        (status = 200, description = "Location available", body = LocationResponse),
        (status = 404, description = "No location known yet", body = super::error::ErrorResponse)
    )
)]
pub async fn get_location(State(state): State<SharedState>) -> ApiResult<Json<LocationResponse>> {
    let (location, origin) = state
        .hub
        .tracker_location()
        .ok_or_else(|| ApiError::from(TrackerError::NoLocation))?;

    Ok(Json(LocationResponse { location, origin }))
}

/// Erase the persisted tracker location.
#[utoipa::path(
    delete,
    path = "/api/location/stored",
    tag = "location",
    operation_id = "eraseStoredLocation",
    summary = "Erase the stored location",
    description = "Removes the persisted last-known position. The in-memory location \
        is kept until the beacon reports a new one.",
    responses(
        (status = 200, description = "Erase completed", body = EraseStoredResponse),
        (status = 500, description = "Record could not be removed", body = super::error::ErrorResponse)
    )
)]
pub async fn erase_stored(State(state): State<SharedState>) -> ApiResult<Json<EraseStoredResponse>> {
    let removed = state.hub.erase_stored().await?;
    info!(removed, "Stored tracker location erased");
    Ok(Json(EraseStoredResponse { removed }))
}

/// Submit the user's GPS fix.
#[utoipa::path(
    post,
    path = "/api/user-location",
    tag = "location",
    operation_id = "submitUserLocation",
    summary = "Submit the user's position",
    description = "Publishes the user's own GPS fix. Distance and elevation to the \
        vehicle are recomputed, and a pending route request fires once both \
        positions are known.",
    request_body = UserLocation,
    responses(
        (status = 202, description = "Fix accepted", body = UserLocation),
        (status = 400, description = "Coordinate out of range", body = super::error::ErrorResponse)
    )
)]
pub async fn submit_user_location(
    State(state): State<SharedState>,
    Json(location): Json<UserLocation>,
) -> ApiResult<(StatusCode, Json<UserLocation>)> {
    location.validate()?;

    debug!(
        latitude = location.latitude,
        longitude = location.longitude,
        "User location received"
    );
    state.hub.publish_user_location(location.clone());

    Ok((StatusCode::ACCEPTED, Json(location)))
}
