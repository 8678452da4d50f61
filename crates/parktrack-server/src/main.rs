//! # parktrack-server
//!
//! Daemon that keeps a link to the parking beacon and serves its location.
//!
//! This binary:
//! - Loads configuration (writing a default file on first run)
//! - Starts the persistence worker, location hub and distance engine
//! - Restores the last stored location
//! - Runs the tracker link over BlueZ, or the built-in simulator
//! - Serves the REST API and event stream
//!
//! ## Running
//!
//! ```bash
//! # Development, simulated tracker
//! PARKTRACK__BLUETOOTH__SIMULATE=true cargo run --package parktrack-server
//!
//! # Real hardware
//! cargo run --package parktrack-server --features bluetooth
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parktrack_core::config::Config;
use parktrack_core::store::FileSecretBackend;
use parktrack_core::{
    persist, DistanceEngine, LinkConfig, LinkHandle, LocationHub, LocationStore, OsrmDirections,
};
use parktrack_server::{api, logging, state::AppState};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = Config::config_path()?;
    let config = Config::load_or_init(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    logging::init(&config.logging)?;
    info!(config = %config_path.display(), "Starting parktrack-server");

    let data_dir = config.storage.resolved_data_dir();
    info!(data_dir = %data_dir.display(), account = %config.storage.account, "Using location store");
    let store = LocationStore::new(
        Arc::new(FileSecretBackend::new(data_dir)),
        config.storage.account.clone(),
    );
    let (persist, _persist_task) = persist::spawn(store);

    let hub = LocationHub::new(persist);
    tokio::spawn({
        let hub = hub.clone();
        async move {
            hub.restore().await;
        }
    });

    let directions = if config.directions.enabled {
        let base_url = config.directions.base_url.parse()?;
        let timeout = Duration::from_secs(config.directions.request_timeout_secs);
        Some(Arc::new(OsrmDirections::new(base_url, timeout)?))
    } else {
        info!("Directions disabled");
        None
    };
    let (distance, _distance_task) = DistanceEngine::spawn(hub.clone(), directions);

    let link_config = config.bluetooth.link_config()?;
    let link = start_link(&config, hub.clone(), link_config).await?;

    let state = AppState::new(hub, distance, link, config.directions.enabled);
    let app = api::create_router(state);

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Start the tracker link on real hardware unless simulation is requested.
async fn start_link(
    config: &Config,
    hub: LocationHub,
    link_config: LinkConfig,
) -> anyhow::Result<Option<LinkHandle>> {
    if cfg!(feature = "bluetooth") && !config.bluetooth.simulate {
        return start_bluez(hub, link_config).await;
    }
    Ok(start_simulator(config, hub, link_config))
}

#[cfg(feature = "bluetooth")]
async fn start_bluez(
    hub: LocationHub,
    link_config: LinkConfig,
) -> anyhow::Result<Option<LinkHandle>> {
    use parktrack_core::bluetooth::bluez::BluezCentral;
    use parktrack_core::DeviceLink;

    let (events, rx) = tokio::sync::mpsc::unbounded_channel();
    let central = BluezCentral::open(events)
        .await
        .context("opening the Bluetooth adapter")?;
    let link = DeviceLink::new(central, hub, link_config);
    let handle = link.handle();
    tokio::spawn(link.run(rx));
    Ok(Some(handle))
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn start_bluez(_: LocationHub, _: LinkConfig) -> anyhow::Result<Option<LinkHandle>> {
    Ok(None)
}

#[cfg(feature = "mock-bluetooth")]
fn start_simulator(
    config: &Config,
    hub: LocationHub,
    link_config: LinkConfig,
) -> Option<LinkHandle> {
    use parktrack_core::bluetooth::mock::{SimulatedTracker, SimulatorConfig};
    use parktrack_core::{Coordinate, DeviceLink};

    let section = &config.bluetooth.simulator;
    let simulator = SimulatorConfig {
        name: link_config.target_name.clone(),
        characteristic: link_config.characteristic,
        position: Coordinate {
            latitude: section.latitude,
            longitude: section.longitude,
        },
        altitude: section.altitude,
        interval: Duration::from_millis(section.interval_ms),
    };
    info!(
        latitude = section.latitude,
        longitude = section.longitude,
        "Using simulated tracker"
    );

    let (events, rx) = tokio::sync::mpsc::unbounded_channel();
    let central = SimulatedTracker::new(simulator, events);
    let link = DeviceLink::new(central, hub, link_config);
    let handle = link.handle();
    tokio::spawn(link.run(rx));
    Some(handle)
}

#[cfg(not(feature = "mock-bluetooth"))]
fn start_simulator(_: &Config, _: LocationHub, _: LinkConfig) -> Option<LinkHandle> {
    tracing::warn!("No Bluetooth binding compiled in; tracker link disabled");
    None
}
