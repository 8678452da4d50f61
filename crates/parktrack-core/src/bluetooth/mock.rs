//! In-process BLE centrals for tests and hardware-less runs.
//!
//! - [`RecordingCentral`] records every command and does nothing else. Tests
//!   drive the callbacks by hand.
//! - [`SimulatedTracker`] behaves like an adapter with the tracker in range:
//!   it answers commands with the matching events and, once notifications
//!   are enabled, streams `Lon:`/`Lat:`/`Alt:` frames for a fixed position.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    AdapterState, Central, CentralEvent, CharacteristicRef, PeripheralId, ServiceId,
    DEFAULT_TARGET_NAME,
};
use crate::location::{Coordinate, COORDINATE_SCALE};

/// A command received by a [`RecordingCentral`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralCommand {
    /// [`Central::start_scan`]
    StartScan,
    /// [`Central::stop_scan`]
    StopScan,
    /// [`Central::connect`]
    Connect(PeripheralId),
    /// [`Central::cancel_connection`]
    CancelConnection(PeripheralId),
    /// [`Central::discover_services`]
    DiscoverServices(PeripheralId),
    /// [`Central::discover_characteristics`]
    DiscoverCharacteristics(PeripheralId, ServiceId),
    /// [`Central::read_value`]
    ReadValue(PeripheralId, CharacteristicRef),
    /// [`Central::set_notify`]
    SetNotify(PeripheralId, CharacteristicRef, bool),
}

/// A central that only records commands. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingCentral {
    log: Arc<Mutex<Vec<CentralCommand>>>,
}

impl RecordingCentral {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn take_commands(&self) -> Vec<CentralCommand> {
        std::mem::take(&mut *self.log.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record(&self, command: CentralCommand) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }
}

impl Central for RecordingCentral {
    fn start_scan(&mut self) {
        self.record(CentralCommand::StartScan);
    }

    fn stop_scan(&mut self) {
        self.record(CentralCommand::StopScan);
    }

    fn connect(&mut self, peripheral: &PeripheralId) {
        self.record(CentralCommand::Connect(peripheral.clone()));
    }

    fn cancel_connection(&mut self, peripheral: &PeripheralId) {
        self.record(CentralCommand::CancelConnection(peripheral.clone()));
    }

    fn discover_services(&mut self, peripheral: &PeripheralId) {
        self.record(CentralCommand::DiscoverServices(peripheral.clone()));
    }

    fn discover_characteristics(&mut self, peripheral: &PeripheralId, service: ServiceId) {
        self.record(CentralCommand::DiscoverCharacteristics(
            peripheral.clone(),
            service,
        ));
    }

    fn read_value(&mut self, peripheral: &PeripheralId, characteristic: &CharacteristicRef) {
        self.record(CentralCommand::ReadValue(peripheral.clone(), *characteristic));
    }

    fn set_notify(
        &mut self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) {
        self.record(CentralCommand::SetNotify(
            peripheral.clone(),
            *characteristic,
            enabled,
        ));
    }
}

// =============================================================================
// SIMULATED TRACKER
// =============================================================================

const SIMULATED_SERVICE: ServiceId = ServiceId(1);
const SIMULATED_CHARACTERISTIC_ID: u16 = 1;

/// Position and cadence of a [`SimulatedTracker`].
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Name the simulated tracker advertises.
    pub name: String,
    /// UUID of the characteristic carrying frames.
    pub characteristic: Uuid,
    /// Reported position.
    pub position: Coordinate,
    /// Reported altitude in meters.
    pub altitude: f64,
    /// Delay between two frames.
    pub interval: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_TARGET_NAME.to_string(),
            characteristic: super::bluetooth_uuid_from_u16(super::LOCATION_CHARACTERISTIC),
            position: Coordinate {
                latitude: 52.520_008,
                longitude: 13.404_954,
            },
            altitude: 34.0,
            interval: Duration::from_secs(1),
        }
    }
}

impl SimulatorConfig {
    /// The three wire frames describing the configured position.
    #[must_use]
    pub fn frames(&self) -> [String; 3] {
        [
            format!("Lon:{:.0}", self.position.longitude * COORDINATE_SCALE),
            format!("Lat:{:.0}", self.position.latitude * COORDINATE_SCALE),
            format!("Alt:{}", self.altitude),
        ]
    }
}

/// A central with one simulated tracker in range.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug)]
pub struct SimulatedTracker {
    config: SimulatorConfig,
    peripheral: PeripheralId,
    events: mpsc::UnboundedSender<CentralEvent>,
    stream: Option<JoinHandle<()>>,
}

impl SimulatedTracker {
    /// Create the simulator and report a powered-on adapter.
    pub fn new(config: SimulatorConfig, events: mpsc::UnboundedSender<CentralEvent>) -> Self {
        let _ = events.send(CentralEvent::AdapterStateChanged(AdapterState::PoweredOn));
        info!(name = %config.name, "Simulated tracker ready");
        Self {
            config,
            peripheral: PeripheralId("SIM:00:00:00:00:01".into()),
            events,
            stream: None,
        }
    }

    fn emit(&self, event: CentralEvent) {
        if self.events.send(event).is_err() {
            debug!("Simulated event dropped; link stopped");
        }
    }

    fn characteristic(&self) -> CharacteristicRef {
        CharacteristicRef {
            service: SIMULATED_SERVICE,
            id: SIMULATED_CHARACTERISTIC_ID,
            uuid: self.config.characteristic,
        }
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
    }
}

impl Drop for SimulatedTracker {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

impl Central for SimulatedTracker {
    fn start_scan(&mut self) {
        self.emit(CentralEvent::DeviceDiscovered {
            peripheral: self.peripheral.clone(),
            name: Some(self.config.name.clone()),
        });
    }

    fn stop_scan(&mut self) {}

    fn connect(&mut self, peripheral: &PeripheralId) {
        self.emit(CentralEvent::Connected(peripheral.clone()));
    }

    fn cancel_connection(&mut self, peripheral: &PeripheralId) {
        self.stop_stream();
        self.emit(CentralEvent::Disconnected {
            peripheral: peripheral.clone(),
            error: None,
        });
    }

    fn discover_services(&mut self, peripheral: &PeripheralId) {
        self.emit(CentralEvent::ServicesDiscovered {
            peripheral: peripheral.clone(),
            services: Ok(vec![SIMULATED_SERVICE]),
        });
    }

    fn discover_characteristics(&mut self, peripheral: &PeripheralId, service: ServiceId) {
        self.emit(CentralEvent::CharacteristicsDiscovered {
            peripheral: peripheral.clone(),
            service,
            characteristics: Ok(vec![self.characteristic()]),
        });
    }

    fn read_value(&mut self, peripheral: &PeripheralId, characteristic: &CharacteristicRef) {
        let [_, latitude, _] = self.config.frames();
        self.emit(CentralEvent::ValueUpdated {
            peripheral: peripheral.clone(),
            characteristic: *characteristic,
            value: Ok(latitude.into_bytes()),
        });
    }

    fn set_notify(
        &mut self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        enabled: bool,
    ) {
        self.stop_stream();
        if !enabled {
            return;
        }

        let events = self.events.clone();
        let frames = self.config.frames();
        let interval = self.config.interval;
        let peripheral = peripheral.clone();
        let characteristic = *characteristic;

        self.stream = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for frame in frames.iter().cycle() {
                ticker.tick().await;
                let event = CentralEvent::ValueUpdated {
                    peripheral: peripheral.clone(),
                    characteristic,
                    value: Ok(frame.clone().into_bytes()),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{parse_frame, FieldTag};

    #[test]
    fn test_recording_central_logs_in_order() {
        let mut central = RecordingCentral::new();
        let observer = central.clone();
        central.start_scan();
        central.connect(&PeripheralId("X".into()));

        assert_eq!(
            observer.take_commands(),
            [
                CentralCommand::StartScan,
                CentralCommand::Connect(PeripheralId("X".into()))
            ]
        );
        assert!(observer.take_commands().is_empty());
    }

    #[test]
    fn test_simulator_frames_parse_back() {
        let config = SimulatorConfig {
            position: Coordinate {
                latitude: 50.0,
                longitude: -100.0,
            },
            altitude: 12.5,
            ..SimulatorConfig::default()
        };
        let frames = config.frames();
        assert_eq!(frames, ["Lon:-1000000000", "Lat:500000000", "Alt:12.5"]);

        let tags: Vec<_> = frames
            .iter()
            .map(|f| parse_frame(f.as_bytes()).unwrap().tag)
            .collect();
        assert_eq!(tags, FieldTag::ALL);
    }

    #[tokio::test]
    async fn test_simulator_answers_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sim = SimulatedTracker::new(
            SimulatorConfig {
                interval: Duration::from_millis(5),
                ..SimulatorConfig::default()
            },
            tx,
        );
        assert_eq!(
            rx.recv().await,
            Some(CentralEvent::AdapterStateChanged(AdapterState::PoweredOn))
        );

        sim.start_scan();
        let Some(CentralEvent::DeviceDiscovered { peripheral, name }) = rx.recv().await else {
            panic!("expected discovery");
        };
        assert_eq!(name.as_deref(), Some(DEFAULT_TARGET_NAME));

        let characteristic = sim.characteristic();
        sim.set_notify(&peripheral, &characteristic, true);
        for _ in 0..3 {
            assert!(matches!(
                rx.recv().await,
                Some(CentralEvent::ValueUpdated { value: Ok(_), .. })
            ));
        }

        sim.cancel_connection(&peripheral);
        assert!(sim.stream.is_none());
    }
}
