//! Server-Sent Events stream of hub events.
//!
//! Each connection is one hub subscriber. The SSE event name is the hub
//! event name (`tracker_location_changed`, `user_location_changed`,
//! `route_updated`) and the data is the JSON-encoded event.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use parktrack_core::{HubEvent, Subscription};
use tracing::{debug, warn};

use crate::state::SharedState;

/// Turn a hub subscription into a stream that ends when the hub goes away.
fn hub_events(subscription: Subscription) -> impl Stream<Item = HubEvent> {
    stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        Some((event, subscription))
    })
}

fn to_sse(event: &HubEvent) -> Event {
    let name = event.name();
    Event::default()
        .event(name)
        .json_data(event)
        .unwrap_or_else(|e| {
            warn!(event = name, error = %e, "Failed to encode event");
            Event::default().event("error").data(e.to_string())
        })
}

/// Stream location, user and route events.
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "events",
    operation_id = "streamEvents",
    summary = "Subscribe to location events",
    description = "A Server-Sent Events stream. Each event is named after its type \
        and carries the JSON-encoded event. If the current tracker location was \
        restored from storage, it is sent first.",
    responses(
        (status = 200, description = "Event stream", body = HubEvent, content_type = "text/event-stream")
    )
)]
pub async fn stream_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();
    debug!(subscribers = state.hub.subscriber_count(), "Event stream opened");

    let events = hub_events(subscription).map(|event| Ok(to_sse(&event)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::testing;
    use chrono::Utc;
    use parktrack_core::{Coordinate, TrackerLocation};

    #[tokio::test]
    async fn test_hub_events_follow_publications() {
        let (_server, state) = testing::server();
        let events = hub_events(state.hub.subscribe());
        futures::pin_mut!(events);

        let fix =
            TrackerLocation::from_beacon(Coordinate::new(52.5, 13.4).unwrap(), 34.0, Utc::now());
        state.hub.publish(fix.clone());

        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .unwrap();
        assert_eq!(event, Some(HubEvent::TrackerLocationChanged(fix)));
    }

    #[test]
    fn test_event_payload_is_tagged_json() {
        let fix =
            TrackerLocation::from_beacon(Coordinate::new(52.5, 13.4).unwrap(), 34.0, Utc::now());
        let json = serde_json::to_value(HubEvent::TrackerLocationChanged(fix)).unwrap();
        assert_eq!(json["type"], "tracker_location_changed");
        assert!((json["payload"]["latitude"].as_f64().unwrap() - 52.5).abs() < f64::EPSILON);
    }
}
