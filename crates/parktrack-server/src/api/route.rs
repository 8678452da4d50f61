//! Distance and walking-route endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use parktrack_core::{DistanceReport, Route, TrackerError};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the route router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_route).post(request_route))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Distance and elevation from the user to the vehicle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "report": {
        "distance_m": 123.46,
        "distance_text": "123.46 meters",
        "elevation_delta_m": -3.0,
        "direction": "descending",
        "elevation_text": "↓ -3.0 meters"
    },
    "summary": "123.46 meters • ↓ -3.0 meters"
}))]
pub struct DistanceResponse {
    /// The computed report.
    pub report: DistanceReport,

    /// Single-line display text.
    #[schema(example = "123.46 meters • ↓ -3.0 meters")]
    pub summary: String,
}

/// Acknowledgement of a route request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "accepted": true,
    "message": "Route will be computed once both positions are known"
}))]
pub struct RouteRequestResponse {
    /// Whether the request was queued.
    pub accepted: bool,

    /// What happens next.
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get distance and elevation to the vehicle.
#[utoipa::path(
    get,
    path = "/api/distance",
    tag = "route",
    operation_id = "getDistance",
    summary = "Get distance to the vehicle",
    description = "Returns the straight-line surface distance and elevation difference \
        between the user's last fix and the vehicle. Distances of 1000 m or more are \
        formatted in kilometers.",
    responses(
        (status = 200, description = "Both positions known", body = DistanceResponse),
        (status = 404, description = "User or tracker position missing", body = super::error::ErrorResponse)
    )
)]
pub async fn get_distance(State(state): State<SharedState>) -> ApiResult<Json<DistanceResponse>> {
    let report = state.distance.report().ok_or_else(|| ApiError::NotFound {
        error_code: "NO_DISTANCE".to_string(),
        message: "Distance needs both a user fix and a tracker location".to_string(),
    })?;

    Ok(Json(DistanceResponse {
        summary: report.summary(),
        report,
    }))
}

/// Request a walking route to the vehicle.
#[utoipa::path(
    post,
    path = "/api/route",
    tag = "route",
    operation_id = "requestRoute",
    summary = "Request a walking route",
    description = "The \"go\" trigger. Queues a one-shot walking-route request that \
        fires as soon as both positions are known. The result is published on the \
        event stream as `route_updated` and served by `GET /api/route`. Repeated \
        requests are not deduplicated.",
    responses(
        (status = 202, description = "Request queued", body = RouteRequestResponse),
        (status = 424, description = "No directions service configured", body = super::error::ErrorResponse),
        (status = 503, description = "Distance engine stopped", body = super::error::ErrorResponse)
    )
)]
pub async fn request_route(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<RouteRequestResponse>)> {
    if !state.directions_enabled {
        return Err(ApiError::FailedDependency {
            error_code: "DIRECTIONS_DISABLED".to_string(),
            message: "No directions service is configured".to_string(),
            details: Some("Set [directions] enabled = true and a base_url".to_string()),
        });
    }

    if !state.distance.request_route() {
        return Err(ApiError::ServiceUnavailable {
            error_code: "DISTANCE_ENGINE_STOPPED".to_string(),
            message: "The distance engine is not running".to_string(),
            details: None,
        });
    }

    let ready = state.hub.user_location().is_some() && state.hub.tracker_location().is_some();
    info!(ready, "Route requested");

    let message = if ready {
        "Route computation started"
    } else {
        "Route will be computed once both positions are known"
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(RouteRequestResponse {
            accepted: true,
            message: message.to_string(),
        }),
    ))
}

/// Get the latest computed route.
#[utoipa::path(
    get,
    path = "/api/route",
    tag = "route",
    operation_id = "getRoute",
    summary = "Get the latest route",
    description = "Returns the most recent walking route: polyline geometry plus \
        ordered step instructions.",
    responses(
        (status = 200, description = "Route available", body = Route),
        (status = 404, description = "No route computed yet", body = super::error::ErrorResponse)
    )
)]
pub async fn get_route(State(state): State<SharedState>) -> ApiResult<Json<Route>> {
    state
        .hub
        .route()
        .map(Json)
        .ok_or_else(|| ApiError::from(TrackerError::NoRoute))
}
