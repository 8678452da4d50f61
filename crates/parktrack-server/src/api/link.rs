//! Tracker link status and control.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parktrack_core::{LinkHandle, LinkState, TrackerError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the link router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_link))
        .route("/rescan", post(rescan))
}

/// Link status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"state": "subscribed", "active": true}))]
pub struct LinkStatusResponse {
    /// Current state of the connection lifecycle.
    pub state: LinkState,

    /// Whether the link is scanning, connecting or connected.
    pub active: bool,
}

impl From<LinkState> for LinkStatusResponse {
    fn from(state: LinkState) -> Self {
        Self {
            state,
            active: state.is_active(),
        }
    }
}

fn link(state: &SharedState) -> ApiResult<&LinkHandle> {
    state.link.as_ref().ok_or_else(|| {
        ApiError::from(TrackerError::BluetoothUnavailable(
            "no Bluetooth binding is running".to_string(),
        ))
    })
}

/// Get the tracker link state.
#[utoipa::path(
    get,
    path = "/api/link",
    tag = "link",
    operation_id = "getLinkState",
    summary = "Get tracker link state",
    description = "Returns where the Bluetooth link to the tracker is in its \
        scan/connect/subscribe lifecycle. `unauthorized` and `unsupported` need \
        action outside this service; every other failure recovers automatically.",
    responses(
        (status = 200, description = "Link state", body = LinkStatusResponse),
        (status = 503, description = "No Bluetooth binding running", body = super::error::ErrorResponse)
    )
)]
pub async fn get_link(State(state): State<SharedState>) -> ApiResult<Json<LinkStatusResponse>> {
    Ok(Json(link(&state)?.state().into()))
}

/// Resume scanning after a scan timeout.
#[utoipa::path(
    post,
    path = "/api/link/rescan",
    tag = "link",
    operation_id = "rescanLink",
    summary = "Resume scanning",
    description = "Only valid in the `idle` state, which the link enters when a \
        configured scan timeout expires without finding the tracker.",
    responses(
        (status = 202, description = "Scan resumed", body = LinkStatusResponse),
        (status = 409, description = "Link is not idle", body = super::error::ErrorResponse),
        (status = 503, description = "No Bluetooth binding running", body = super::error::ErrorResponse)
    )
)]
pub async fn rescan(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<LinkStatusResponse>)> {
    let link = link(&state)?;
    let current = link.state();

    if current != LinkState::Idle {
        return Err(ApiError::Conflict {
            error_code: "LINK_NOT_IDLE".to_string(),
            message: format!("Rescan is only possible while idle; link is {current}"),
            details: Some(serde_json::json!({ "state": current })),
        });
    }

    if !link.rescan() {
        return Err(ApiError::ServiceUnavailable {
            error_code: "LINK_STOPPED".to_string(),
            message: "The tracker link is not running".to_string(),
            details: None,
        });
    }

    Ok((StatusCode::ACCEPTED, Json(current.into())))
}
