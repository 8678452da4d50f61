//! Bluetooth Low Energy central-role plumbing.
//!
//! This module defines the seam between the tracker link state machine and
//! whatever BLE stack is underneath:
//!
//! - [`Central`]: commands issued to the stack (scan, connect, discover, ...)
//! - [`CentralDelegate`]: callbacks the stack reports back
//! - [`CentralEvent`]: those callbacks as values, so they can travel over a
//!   channel into the single hardware-event context
//!
//! [`DeviceLink`] implements [`CentralDelegate`] and drives the connection
//! lifecycle. Concrete bindings live in [`bluez`] (feature `bluetooth`) and
//! [`mock`] (feature `mock-bluetooth`).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

mod link;

#[cfg(feature = "bluetooth")]
pub mod bluez;

#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;

pub use link::{DeviceLink, LinkConfig, LinkHandle};

/// Advertised name of the tracker hardware.
pub const DEFAULT_TARGET_NAME: &str = "DSD TECH";

/// 16-bit UUID of the characteristic streaming location frames.
pub const LOCATION_CHARACTERISTIC: u16 = 0x2AAF;

const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Expand a 16-bit assigned number into a full Bluetooth UUID.
#[must_use]
pub const fn bluetooth_uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Parse a characteristic UUID given either as 4 hex digits or in full form.
///
/// # Errors
///
/// Returns [`LinkError::InvalidUuid`] if the text is neither.
pub fn parse_characteristic_uuid(text: &str) -> Result<Uuid, LinkError> {
    let text = text.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if text.len() == 4 {
        return u16::from_str_radix(text, 16)
            .map(bluetooth_uuid_from_u16)
            .map_err(|_| LinkError::InvalidUuid(text.to_string()));
    }
    Uuid::parse_str(text).map_err(|_| LinkError::InvalidUuid(text.to_string()))
}

// =============================================================================
// ERRORS
// =============================================================================

/// Errors raised while setting up a BLE binding.
///
/// Once running, link failures are never surfaced as errors; they show up as
/// [`LinkState`] transitions instead.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The process is not allowed to use Bluetooth.
    #[error("Bluetooth access not authorized")]
    Unauthorized,

    /// The adapter does not support Bluetooth Low Energy.
    #[error("Bluetooth Low Energy is not supported on this adapter")]
    Unsupported,

    /// A characteristic UUID could not be parsed.
    #[error("Invalid characteristic UUID: '{0}'. Expected 4 hex digits (e.g. '2AAF') or a full UUID")]
    InvalidUuid(String),

    /// Any other failure reported by the BLE stack.
    #[error("Bluetooth stack error: {0}")]
    Stack(String),
}

// =============================================================================
// IDENTIFIERS AND STATES
// =============================================================================

/// Power/authorization state reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Not yet known.
    Unknown,
    /// Temporarily resetting.
    Resetting,
    /// No BLE support.
    Unsupported,
    /// Access denied to this process.
    Unauthorized,
    /// Present but powered off.
    PoweredOff,
    /// Ready for use.
    PoweredOn,
}

/// Opaque identifier of a remote peripheral (a MAC address on BlueZ).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stack-assigned handle of a discovered GATT service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub u16);

/// A discovered GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    /// Service the characteristic belongs to.
    pub service: ServiceId,
    /// Stack-assigned handle.
    pub id: u16,
    /// Characteristic UUID.
    pub uuid: Uuid,
}

/// Lifecycle of the link to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Adapter off or not yet reported.
    PoweredOff,
    /// Looking for the tracker's advertisement.
    Scanning,
    /// Connection attempt in progress.
    Connecting,
    /// Connected; enumerating services and characteristics.
    Discovering,
    /// Receiving location notifications.
    Subscribed,
    /// Link lost; about to scan again.
    Disconnected,
    /// Bluetooth access denied. Needs action outside this process.
    Unauthorized,
    /// Adapter cannot do BLE.
    Unsupported,
    /// Scan timed out; waiting for an explicit rescan.
    Idle,
}

impl LinkState {
    /// Whether the link is somewhere in the scan/connect cycle.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Scanning | Self::Connecting | Self::Discovering | Self::Subscribed
        )
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PoweredOff => "powered_off",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::Subscribed => "subscribed",
            Self::Disconnected => "disconnected",
            Self::Unauthorized => "unauthorized",
            Self::Unsupported => "unsupported",
            Self::Idle => "idle",
        };
        f.write_str(name)
    }
}

// =============================================================================
// CAPABILITY INTERFACES
// =============================================================================

/// Commands a BLE central stack must accept.
///
/// Every command is fire-and-forget: results come back later as
/// [`CentralEvent`]s. In particular `cancel_connection` must eventually be
/// answered with `Disconnected` for that peripheral, and a failed `connect`
/// is reported as `Disconnected` with an error.
pub trait Central: Send {
    /// Start an unfiltered scan for advertisements.
    fn start_scan(&mut self);
    /// Stop scanning.
    fn stop_scan(&mut self);
    /// Connect to a discovered peripheral.
    fn connect(&mut self, peripheral: &PeripheralId);
    /// Tear down a connection or a pending connection attempt.
    fn cancel_connection(&mut self, peripheral: &PeripheralId);
    /// Enumerate the peripheral's services.
    fn discover_services(&mut self, peripheral: &PeripheralId);
    /// Enumerate the characteristics of one service.
    fn discover_characteristics(&mut self, peripheral: &PeripheralId, service: ServiceId);
    /// Read a characteristic once.
    fn read_value(&mut self, peripheral: &PeripheralId, characteristic: &CharacteristicRef);
    /// Enable or disable change notifications.
    fn set_notify(
        &mut self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        enabled: bool,
    );
}

/// Callbacks reported by a BLE central stack.
pub trait CentralDelegate {
    /// The adapter changed power or authorization state.
    fn on_adapter_state_changed(&mut self, state: AdapterState);
    /// An advertisement was seen.
    fn on_device_discovered(&mut self, peripheral: PeripheralId, name: Option<String>);
    /// A connection attempt succeeded.
    fn on_connected(&mut self, peripheral: PeripheralId);
    /// A connection ended or an attempt failed.
    fn on_disconnected(&mut self, peripheral: PeripheralId, error: Option<String>);
    /// Service enumeration finished.
    fn on_services_discovered(
        &mut self,
        peripheral: PeripheralId,
        services: Result<Vec<ServiceId>, String>,
    );
    /// Characteristic enumeration for one service finished.
    fn on_characteristics_discovered(
        &mut self,
        peripheral: PeripheralId,
        service: ServiceId,
        characteristics: Result<Vec<CharacteristicRef>, String>,
    );
    /// A read completed or a notification arrived.
    fn on_value_updated(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        value: Result<Vec<u8>, String>,
    );
}

/// A [`CentralDelegate`] callback captured as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    /// See [`CentralDelegate::on_adapter_state_changed`].
    AdapterStateChanged(AdapterState),
    /// See [`CentralDelegate::on_device_discovered`].
    DeviceDiscovered {
        /// Advertising peripheral.
        peripheral: PeripheralId,
        /// Advertised local name, if any.
        name: Option<String>,
    },
    /// See [`CentralDelegate::on_connected`].
    Connected(PeripheralId),
    /// See [`CentralDelegate::on_disconnected`].
    Disconnected {
        /// Peripheral that went away.
        peripheral: PeripheralId,
        /// Failure description, `None` for a clean disconnect.
        error: Option<String>,
    },
    /// See [`CentralDelegate::on_services_discovered`].
    ServicesDiscovered {
        /// Peripheral queried.
        peripheral: PeripheralId,
        /// Discovered services or the failure.
        services: Result<Vec<ServiceId>, String>,
    },
    /// See [`CentralDelegate::on_characteristics_discovered`].
    CharacteristicsDiscovered {
        /// Peripheral queried.
        peripheral: PeripheralId,
        /// Service queried.
        service: ServiceId,
        /// Discovered characteristics or the failure.
        characteristics: Result<Vec<CharacteristicRef>, String>,
    },
    /// See [`CentralDelegate::on_value_updated`].
    ValueUpdated {
        /// Peripheral the value came from.
        peripheral: PeripheralId,
        /// Characteristic the value belongs to.
        characteristic: CharacteristicRef,
        /// Value bytes or the read failure.
        value: Result<Vec<u8>, String>,
    },
}

impl CentralEvent {
    /// Invoke the matching callback on `delegate`.
    pub fn dispatch<D: CentralDelegate + ?Sized>(self, delegate: &mut D) {
        match self {
            Self::AdapterStateChanged(state) => delegate.on_adapter_state_changed(state),
            Self::DeviceDiscovered { peripheral, name } => {
                delegate.on_device_discovered(peripheral, name);
            }
            Self::Connected(peripheral) => delegate.on_connected(peripheral),
            Self::Disconnected { peripheral, error } => delegate.on_disconnected(peripheral, error),
            Self::ServicesDiscovered {
                peripheral,
                services,
            } => delegate.on_services_discovered(peripheral, services),
            Self::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            } => delegate.on_characteristics_discovered(peripheral, service, characteristics),
            Self::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => delegate.on_value_updated(peripheral, characteristic, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            bluetooth_uuid_from_u16(LOCATION_CHARACTERISTIC).to_string(),
            "00002aaf-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_parse_characteristic_uuid() {
        let expected = bluetooth_uuid_from_u16(0x2AAF);
        assert_eq!(parse_characteristic_uuid("2AAF").unwrap(), expected);
        assert_eq!(parse_characteristic_uuid("0x2aaf").unwrap(), expected);
        assert_eq!(
            parse_characteristic_uuid("00002aaf-0000-1000-8000-00805f9b34fb").unwrap(),
            expected
        );
        assert!(matches!(
            parse_characteristic_uuid("zzzz"),
            Err(LinkError::InvalidUuid(_))
        ));
        assert!(parse_characteristic_uuid("2AAF0").is_err());
    }

    #[test]
    fn test_link_state_activity() {
        assert!(LinkState::Scanning.is_active());
        assert!(LinkState::Subscribed.is_active());
        assert!(!LinkState::Idle.is_active());
        assert!(!LinkState::Unauthorized.is_active());
        assert_eq!(LinkState::PoweredOff.to_string(), "powered_off");
    }

    #[derive(Default)]
    struct Counter {
        calls: Vec<&'static str>,
    }

    impl CentralDelegate for Counter {
        fn on_adapter_state_changed(&mut self, _: AdapterState) {
            self.calls.push("adapter");
        }
        fn on_device_discovered(&mut self, _: PeripheralId, _: Option<String>) {
            self.calls.push("discovered");
        }
        fn on_connected(&mut self, _: PeripheralId) {
            self.calls.push("connected");
        }
        fn on_disconnected(&mut self, _: PeripheralId, _: Option<String>) {
            self.calls.push("disconnected");
        }
        fn on_services_discovered(&mut self, _: PeripheralId, _: Result<Vec<ServiceId>, String>) {
            self.calls.push("services");
        }
        fn on_characteristics_discovered(
            &mut self,
            _: PeripheralId,
            _: ServiceId,
            _: Result<Vec<CharacteristicRef>, String>,
        ) {
            self.calls.push("characteristics");
        }
        fn on_value_updated(
            &mut self,
            _: PeripheralId,
            _: CharacteristicRef,
            _: Result<Vec<u8>, String>,
        ) {
            self.calls.push("value");
        }
    }

    #[test]
    fn test_dispatch_routes_to_matching_callback() {
        let peripheral = PeripheralId("AA:BB".into());
        let mut counter = Counter::default();
        CentralEvent::AdapterStateChanged(AdapterState::PoweredOn).dispatch(&mut counter);
        CentralEvent::Connected(peripheral.clone()).dispatch(&mut counter);
        CentralEvent::Disconnected {
            peripheral,
            error: None,
        }
        .dispatch(&mut counter);
        assert_eq!(counter.calls, ["adapter", "connected", "disconnected"]);
    }
}
