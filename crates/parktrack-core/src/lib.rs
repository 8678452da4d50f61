//! # parktrack-core
//!
//! Core logic for tracking a BLE beacon attached to a parked vehicle.
//!
//! This crate provides:
//! - The BLE central-role state machine that finds, connects and subscribes
//!   to the tracker, and recovers from link loss
//! - Parsing and reassembly of the tracker's `Lon:`/`Lat:`/`Alt:` frames
//! - Distribution of location updates to subscribers
//! - Persistence of the last known position across restarts
//! - Distance, elevation and walking-route computation for the user
//!
//! ## Architecture
//!
//! Data flows leaf-first:
//!
//! ```text
//! DeviceLink -> parse_frame -> LocationAssembler -> LocationHub -+-> persistence worker -> LocationStore
//!                                                                +-> DistanceEngine -> DirectionsProvider
//!                                                                +-> other subscribers
//! ```
//!
//! - [`bluetooth`] - Central/delegate interfaces, the [`DeviceLink`] state machine and bindings
//! - [`frame`] - Stateless parser for one notification payload
//! - [`assembler`] - Accumulates frames into a [`TrackerLocation`]
//! - [`hub`] - Publish/subscribe distribution of location events
//! - [`store`] - Keychain-style single-record persistence
//! - [`persist`] - The background context that runs store operations
//! - [`distance`] - Distance/elevation formatting and the route trigger
//! - [`directions`] - Walking-route provider boundary
//! - [`config`] - Layered configuration
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod assembler;
pub mod bluetooth;
pub mod config;
pub mod directions;
pub mod distance;
pub mod error;
pub mod frame;
pub mod hub;
pub mod location;
pub mod persist;
pub mod store;

// Re-export primary types for convenience
pub use assembler::{LocationAssembler, PartialFrame};
pub use bluetooth::{
    AdapterState, Central, CentralDelegate, CentralEvent, CharacteristicRef, DeviceLink, LinkConfig,
    LinkError, LinkHandle, LinkState, PeripheralId, ServiceId,
};
pub use config::{Config, ConfigError, ConfigResult};
pub use directions::{DirectionsError, DirectionsProvider, OsrmDirections, Route, RouteStep, TravelMode};
pub use distance::{DistanceEngine, DistanceHandle, DistanceReport, ElevationDirection};
pub use error::{Result, TrackerError};
pub use frame::{parse_frame, FieldTag, Frame, FrameError};
pub use hub::{HubEvent, LocationHub, LocationOrigin, LocationSink, Subscription};
pub use location::{Coordinate, TrackerLocation, UserLocation};
pub use persist::PersistHandle;
pub use store::{LocationStore, StoreError, StoreResult};
