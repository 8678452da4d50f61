//! Walking directions from the user to the parked vehicle.
//!
//! Route computation is an external service. [`DirectionsProvider`] is the
//! boundary; [`OsrmDirections`] implements it against any OSRM-compatible HTTP
//! routing service.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;
use utoipa::ToSchema;

use crate::location::Coordinate;

/// Transport mode for a route request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    /// Pedestrian routing.
    Walking,
}

impl TravelMode {
    /// OSRM profile name for this mode.
    #[must_use]
    pub const fn osrm_profile(self) -> &'static str {
        match self {
            Self::Walking => "foot",
        }
    }
}

/// One instruction along a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RouteStep {
    /// Human-readable instruction.
    #[schema(example = "Turn left onto Main Street")]
    pub instruction: String,

    /// Length of this step in meters.
    #[schema(example = 120.5)]
    pub distance_m: f64,
}

/// A computed route: geometry plus ordered step instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Route {
    /// Path geometry from origin to destination.
    pub polyline: Vec<Coordinate>,

    /// Ordered step instructions.
    pub steps: Vec<RouteStep>,

    /// Total length in meters.
    pub distance_m: f64,

    /// Expected travel time in seconds.
    pub duration_s: f64,
}

impl Route {
    /// Step instructions joined one per line.
    #[must_use]
    pub fn instructions_text(&self) -> String {
        self.steps
            .iter()
            .map(|step| step.instruction.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Errors from a directions provider.
#[derive(Debug, Error)]
pub enum DirectionsError {
    /// Transport-level failure.
    #[error("directions request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error status.
    #[error("directions service returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Service-provided message.
        message: String,
    },

    /// The service found no route between the points.
    #[error("no route found between the given points")]
    NoRoute,

    /// The response could not be interpreted.
    #[error("unexpected directions response: {0}")]
    Decode(String),

    /// The base URL is unusable.
    #[error("invalid directions URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// An external service that computes routes between two coordinates.
pub trait DirectionsProvider: Send + Sync + 'static {
    /// Compute a route from `origin` to `destination`.
    fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> impl Future<Output = Result<Route, DirectionsError>> + Send;
}

/// Client for an OSRM-compatible routing service.
#[derive(Debug, Clone)]
pub struct OsrmDirections {
    client: reqwest::Client,
    base_url: Url,
}

impl OsrmDirections {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, DirectionsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("parktrack/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Build the request URL for a route query.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting URL is invalid.
    pub fn route_url(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> Result<Url, DirectionsError> {
        let mut url = Url::parse(&format!(
            "{}/route/v1/{}/{},{};{},{}",
            self.base_url.as_str().trim_end_matches('/'),
            mode.osrm_profile(),
            origin.longitude,
            origin.latitude,
            destination.longitude,
            destination.latitude,
        ))?;
        url.query_pairs_mut()
            .append_pair("overview", "full")
            .append_pair("geometries", "geojson")
            .append_pair("steps", "true");
        Ok(url)
    }
}

impl DirectionsProvider for OsrmDirections {
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> Result<Route, DirectionsError> {
        let url = self.route_url(origin, destination, mode)?;
        debug!(%url, "Requesting route");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: Result<OsrmResponse, _> = serde_json::from_str(&body);
        match parsed {
            Ok(osrm) if status.is_success() => osrm.into_route(),
            Ok(osrm) if osrm.code == "NoRoute" => Err(DirectionsError::NoRoute),
            Ok(osrm) => Err(DirectionsError::Status {
                status: status.as_u16(),
                message: osrm.message.unwrap_or(osrm.code),
            }),
            Err(_) if !status.is_success() => Err(DirectionsError::Status {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            }),
            Err(e) => Err(DirectionsError::Decode(e.to_string())),
        }
    }
}

// ============================================================================
// OSRM wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    legs: Vec<OsrmLeg>,
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    #[serde(default)]
    name: String,
    distance: f64,
    maneuver: OsrmManeuver,
}

#[derive(Debug, Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    modifier: Option<String>,
    exit: Option<u32>,
}

impl OsrmResponse {
    fn into_route(self) -> Result<Route, DirectionsError> {
        if self.code == "NoRoute" {
            return Err(DirectionsError::NoRoute);
        }
        if self.code != "Ok" {
            return Err(DirectionsError::Status {
                status: 200,
                message: self.message.unwrap_or(self.code),
            });
        }

        let route = self
            .routes
            .into_iter()
            .next()
            .ok_or(DirectionsError::NoRoute)?;

        let polyline = route
            .geometry
            .coordinates
            .into_iter()
            .map(|[longitude, latitude]| Coordinate {
                latitude,
                longitude,
            })
            .collect();

        let steps = route
            .legs
            .into_iter()
            .flat_map(|leg| leg.steps)
            .map(|step| RouteStep {
                instruction: instruction_text(&step.maneuver, &step.name),
                distance_m: step.distance,
            })
            .collect();

        Ok(Route {
            polyline,
            steps,
            distance_m: route.distance,
            duration_s: route.duration,
        })
    }
}

fn instruction_text(maneuver: &OsrmManeuver, name: &str) -> String {
    let onto = if name.is_empty() {
        String::new()
    } else {
        format!(" onto {name}")
    };
    let modifier = maneuver.modifier.as_deref();

    match maneuver.kind.as_str() {
        "depart" if name.is_empty() => "Head out".to_string(),
        "depart" => format!("Head out on {name}"),
        "arrive" => "Arrive at your vehicle".to_string(),
        "roundabout" | "rotary" => match maneuver.exit {
            Some(exit) => format!("At the roundabout, take exit {exit}{onto}"),
            None => format!("Enter the roundabout{onto}"),
        },
        "continue" | "new name" => match modifier {
            Some("straight") | None => format!("Continue{onto}"),
            Some(m) => format!("Continue {m}{onto}"),
        },
        _ => match modifier {
            Some("uturn") => format!("Make a U-turn{onto}"),
            Some("straight") => format!("Go straight{onto}"),
            Some(m) => format!("Turn {m}{onto}"),
            None => format!("Continue{onto}"),
        },
    }
}
