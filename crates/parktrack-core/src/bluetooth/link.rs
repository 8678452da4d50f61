//! The tracker link state machine.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
    bluetooth_uuid_from_u16, AdapterState, Central, CentralDelegate, CentralEvent,
    CharacteristicRef, LinkState, PeripheralId, ServiceId, DEFAULT_TARGET_NAME,
    LOCATION_CHARACTERISTIC,
};
use crate::assembler::LocationAssembler;
use crate::frame::parse_frame;
use crate::hub::LocationSink;

/// Parameters of a [`DeviceLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Exact advertised name of the tracker.
    pub target_name: String,
    /// UUID of the location characteristic.
    pub characteristic: Uuid,
    /// Give up scanning after this long. `None` scans forever.
    pub scan_timeout: Option<Duration>,
    /// Cancel a connection that is not subscribed after this long.
    /// `None` waits forever.
    pub connect_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target_name: DEFAULT_TARGET_NAME.to_string(),
            characteristic: bluetooth_uuid_from_u16(LOCATION_CHARACTERISTIC),
            scan_timeout: None,
            connect_timeout: None,
        }
    }
}

enum LinkCommand {
    Rescan,
}

/// Observer and remote control for a running [`DeviceLink`].
#[derive(Debug, Clone)]
pub struct LinkHandle {
    state: watch::Receiver<LinkState>,
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl std::fmt::Debug for LinkCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Rescan")
    }
}

impl LinkHandle {
    /// Current link state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch channel of link states.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Resume scanning after a scan timeout. Ignored in any other state.
    ///
    /// Returns `false` if the link is no longer running.
    pub fn rescan(&self) -> bool {
        self.commands.send(LinkCommand::Rescan).is_ok()
    }
}

/// BLE central-role state machine for the tracker.
///
/// Owns the [`LocationAssembler`]; every assembled location goes to the
/// [`LocationSink`]. All callbacks must come from one serialized context,
/// normally [`DeviceLink::run`].
pub struct DeviceLink<C, S> {
    central: C,
    sink: S,
    config: LinkConfig,
    assembler: LocationAssembler,
    state: watch::Sender<LinkState>,
    peripheral: Option<PeripheralId>,
    location_characteristic: Option<CharacteristicRef>,
    pending_services: usize,
    deadline: Option<Instant>,
    commands_tx: mpsc::UnboundedSender<LinkCommand>,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
}

impl<C, S> std::fmt::Debug for DeviceLink<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("state", &*self.state.borrow())
            .field("peripheral", &self.peripheral)
            .field("target_name", &self.config.target_name)
            .finish_non_exhaustive()
    }
}

impl<C: Central, S: LocationSink> DeviceLink<C, S> {
    /// Create a link in the `PoweredOff` state. Nothing happens until the
    /// adapter reports power-on.
    pub fn new(central: C, sink: S, config: LinkConfig) -> Self {
        Self::with_assembler(central, sink, config, LocationAssembler::new())
    }

    /// Create a link using a preconfigured assembler.
    pub fn with_assembler(
        central: C,
        sink: S,
        config: LinkConfig,
        assembler: LocationAssembler,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::PoweredOff);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        Self {
            central,
            sink,
            config,
            assembler,
            state,
            peripheral: None,
            location_characteristic: None,
            pending_services: 0,
            deadline: None,
            commands_tx,
            commands,
        }
    }

    /// A handle for observing and controlling this link.
    #[must_use]
    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            state: self.state.subscribe(),
            commands: self.commands_tx.clone(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// The underlying central.
    pub const fn central(&self) -> &C {
        &self.central
    }

    /// The pending scan or connect deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Process hardware events until the event channel closes.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<CentralEvent>) {
        info!(target_name = %self.config.target_name, "Device link started");

        loop {
            let deadline = self.deadline;
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event.dispatch(&mut self),
                    None => break,
                },
                Some(command) = self.commands.recv() => match command {
                    LinkCommand::Rescan => self.rescan(),
                },
                () = wait_until(deadline) => self.on_timeout(),
            }
        }

        info!("Device link stopped");
    }

    /// Leave `Idle` and scan again.
    pub fn rescan(&mut self) {
        if self.state() == LinkState::Idle {
            info!("Rescan requested");
            self.start_scanning();
        } else {
            debug!(state = %self.state(), "Rescan ignored");
        }
    }

    /// Handle expiry of the current deadline.
    pub fn on_timeout(&mut self) {
        self.deadline = None;
        match self.state() {
            LinkState::Scanning => {
                info!(
                    target_name = %self.config.target_name,
                    "Tracker not found before scan timeout; pausing"
                );
                self.central.stop_scan();
                self.set_state(LinkState::Idle);
            }
            LinkState::Connecting | LinkState::Discovering => {
                if let Some(peripheral) = self.peripheral.clone() {
                    warn!(%peripheral, "Connection not established in time; cancelling");
                    self.central.cancel_connection(&peripheral);
                }
            }
            state => debug!(%state, "Stale timeout ignored"),
        }
    }

    fn set_state(&self, next: LinkState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Link state changed");
        }
    }

    fn arm(&mut self, timeout: Option<Duration>) {
        self.deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    }

    fn start_scanning(&mut self) {
        self.central.start_scan();
        self.set_state(LinkState::Scanning);
        self.arm(self.config.scan_timeout);
    }

    fn forget_peripheral(&mut self) {
        self.peripheral = None;
        self.location_characteristic = None;
        self.pending_services = 0;
        self.deadline = None;
    }

    fn is_current(&self, peripheral: &PeripheralId) -> bool {
        self.peripheral.as_ref() == Some(peripheral)
    }

    fn abandon_discovery(&mut self, peripheral: &PeripheralId, stage: &str, error: &str) {
        warn!(%peripheral, stage, error, "Discovery failed; dropping connection");
        self.central.cancel_connection(peripheral);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<C: Central, S: LocationSink> CentralDelegate for DeviceLink<C, S> {
    fn on_adapter_state_changed(&mut self, adapter: AdapterState) {
        match adapter {
            AdapterState::PoweredOn => match self.state() {
                LinkState::PoweredOff
                | LinkState::Unauthorized
                | LinkState::Unsupported
                | LinkState::Disconnected => {
                    info!("Bluetooth powered on; scanning for tracker");
                    self.start_scanning();
                }
                state => debug!(%state, "Adapter power-on ignored"),
            },
            AdapterState::PoweredOff | AdapterState::Resetting => {
                info!(?adapter, "Bluetooth unavailable");
                self.forget_peripheral();
                self.set_state(LinkState::PoweredOff);
            }
            AdapterState::Unauthorized => {
                warn!("Bluetooth access is not authorized; grant access to resume tracking");
                self.forget_peripheral();
                self.set_state(LinkState::Unauthorized);
            }
            AdapterState::Unsupported => {
                warn!("Bluetooth Low Energy is not supported on this adapter");
                self.forget_peripheral();
                self.set_state(LinkState::Unsupported);
            }
            AdapterState::Unknown => debug!("Adapter state unknown"),
        }
    }

    fn on_device_discovered(&mut self, peripheral: PeripheralId, name: Option<String>) {
        if self.state() != LinkState::Scanning {
            return;
        }
        if name.as_deref() != Some(self.config.target_name.as_str()) {
            trace!(%peripheral, ?name, "Ignoring advertisement");
            return;
        }

        info!(%peripheral, "Tracker found; connecting");
        self.central.stop_scan();
        self.central.connect(&peripheral);
        self.peripheral = Some(peripheral);
        self.set_state(LinkState::Connecting);
        self.arm(self.config.connect_timeout);
    }

    fn on_connected(&mut self, peripheral: PeripheralId) {
        if !self.is_current(&peripheral) {
            debug!(%peripheral, "Connection from unexpected peripheral ignored");
            return;
        }
        info!(%peripheral, "Connected; discovering services");
        self.set_state(LinkState::Discovering);
        self.central.discover_services(&peripheral);
    }

    fn on_disconnected(&mut self, peripheral: PeripheralId, error: Option<String>) {
        if !self.is_current(&peripheral) {
            debug!(%peripheral, "Disconnect from unexpected peripheral ignored");
            return;
        }
        match error {
            Some(error) => warn!(%peripheral, %error, "Link lost"),
            None => info!(%peripheral, "Disconnected"),
        }
        self.forget_peripheral();
        self.set_state(LinkState::Disconnected);
        self.start_scanning();
    }

    fn on_services_discovered(
        &mut self,
        peripheral: PeripheralId,
        services: Result<Vec<ServiceId>, String>,
    ) {
        if !self.is_current(&peripheral) {
            return;
        }
        let services = match services {
            Ok(services) => services,
            Err(error) => return self.abandon_discovery(&peripheral, "services", &error),
        };

        debug!(%peripheral, count = services.len(), "Services discovered");
        if services.is_empty() {
            warn!(%peripheral, "Tracker exposes no services; no location data will arrive");
            self.deadline = None;
            return;
        }
        self.pending_services = services.len();
        for service in services {
            self.central.discover_characteristics(&peripheral, service);
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        peripheral: PeripheralId,
        service: ServiceId,
        characteristics: Result<Vec<CharacteristicRef>, String>,
    ) {
        if !self.is_current(&peripheral) {
            return;
        }
        self.pending_services = self.pending_services.saturating_sub(1);
        let characteristics = match characteristics {
            Ok(characteristics) => characteristics,
            Err(error) if self.location_characteristic.is_some() => {
                debug!(%peripheral, service = service.0, %error, "Characteristic discovery failed on unrelated service");
                return;
            }
            Err(error) => return self.abandon_discovery(&peripheral, "characteristics", &error),
        };

        if self.location_characteristic.is_none() {
            if let Some(found) = characteristics
                .into_iter()
                .find(|c| c.uuid == self.config.characteristic)
            {
                info!(%peripheral, service = service.0, "Location characteristic found; subscribing");
                self.central.read_value(&peripheral, &found);
                self.central.set_notify(&peripheral, &found, true);
                self.location_characteristic = Some(found);
                self.deadline = None;
                self.set_state(LinkState::Subscribed);
                return;
            }
        }

        if self.pending_services == 0 && self.location_characteristic.is_none() {
            warn!(
                %peripheral,
                characteristic = %self.config.characteristic,
                "Location characteristic not found; staying connected without data"
            );
            self.deadline = None;
        }
    }

    fn on_value_updated(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        value: Result<Vec<u8>, String>,
    ) {
        if !self.is_current(&peripheral) || characteristic.uuid != self.config.characteristic {
            return;
        }
        let payload = match value {
            Ok(payload) => payload,
            Err(error) => {
                debug!(%peripheral, %error, "Characteristic read failed");
                return;
            }
        };

        match parse_frame(&payload) {
            Ok(frame) => {
                if let Some(location) = self.assembler.ingest(frame) {
                    info!(
                        latitude = location.latitude,
                        longitude = location.longitude,
                        altitude = location.altitude,
                        "Tracker location assembled"
                    );
                    self.sink.publish(location);
                }
            }
            Err(e) => trace!(error = %e, "Dropping malformed frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::mock::{CentralCommand, RecordingCentral};
    use crate::location::TrackerLocation;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CollectingSink(Arc<Mutex<Vec<TrackerLocation>>>);

    impl LocationSink for CollectingSink {
        fn publish(&self, location: TrackerLocation) {
            self.0.lock().unwrap().push(location);
        }
    }

    impl CollectingSink {
        fn published(&self) -> Vec<TrackerLocation> {
            self.0.lock().unwrap().clone()
        }
    }

    fn tracker() -> PeripheralId {
        PeripheralId("00:11:22:33:44:55".into())
    }

    fn location_char() -> CharacteristicRef {
        CharacteristicRef {
            service: ServiceId(1),
            id: 7,
            uuid: bluetooth_uuid_from_u16(LOCATION_CHARACTERISTIC),
        }
    }

    fn link_with(
        config: LinkConfig,
    ) -> (
        DeviceLink<RecordingCentral, CollectingSink>,
        RecordingCentral,
        CollectingSink,
    ) {
        let central = RecordingCentral::new();
        let sink = CollectingSink::default();
        let link = DeviceLink::new(central.clone(), sink.clone(), config);
        (link, central, sink)
    }

    fn scanning_link() -> (
        DeviceLink<RecordingCentral, CollectingSink>,
        RecordingCentral,
        CollectingSink,
    ) {
        let (mut link, central, sink) = link_with(LinkConfig::default());
        link.on_adapter_state_changed(AdapterState::PoweredOn);
        central.take_commands();
        (link, central, sink)
    }

    fn subscribed_link() -> (
        DeviceLink<RecordingCentral, CollectingSink>,
        RecordingCentral,
        CollectingSink,
    ) {
        let (mut link, central, sink) = scanning_link();
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        link.on_connected(tracker());
        link.on_services_discovered(tracker(), Ok(vec![ServiceId(1)]));
        link.on_characteristics_discovered(tracker(), ServiceId(1), Ok(vec![location_char()]));
        assert_eq!(link.state(), LinkState::Subscribed);
        central.take_commands();
        (link, central, sink)
    }

    #[test]
    fn test_starts_powered_off_and_scans_on_power_on() {
        let (mut link, central, _) = link_with(LinkConfig::default());
        assert_eq!(link.state(), LinkState::PoweredOff);

        link.on_adapter_state_changed(AdapterState::PoweredOn);
        assert_eq!(link.state(), LinkState::Scanning);
        assert_eq!(central.take_commands(), [CentralCommand::StartScan]);
        assert!(link.deadline().is_none());
    }

    #[test]
    fn test_other_device_keeps_scanning() {
        let (mut link, central, _) = scanning_link();
        link.on_device_discovered(PeripheralId("AA".into()), Some("OtherDevice".into()));
        link.on_device_discovered(PeripheralId("BB".into()), None);

        assert_eq!(link.state(), LinkState::Scanning);
        assert!(central.take_commands().is_empty());
    }

    #[test]
    fn test_name_match_is_exact() {
        let (mut link, central, _) = scanning_link();
        link.on_device_discovered(PeripheralId("AA".into()), Some("DSD TECH 2".into()));
        link.on_device_discovered(PeripheralId("BB".into()), Some("dsd tech".into()));
        assert_eq!(link.state(), LinkState::Scanning);
        assert!(central.take_commands().is_empty());
    }

    #[test]
    fn test_target_name_stops_scan_and_connects() {
        let (mut link, central, _) = scanning_link();
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));

        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(
            central.take_commands(),
            [CentralCommand::StopScan, CentralCommand::Connect(tracker())]
        );

        // Only the first match is taken.
        link.on_device_discovered(PeripheralId("CC".into()), Some(DEFAULT_TARGET_NAME.into()));
        assert!(central.take_commands().is_empty());
    }

    #[test]
    fn test_discovery_subscribes_to_location_characteristic() {
        let (mut link, central, _) = scanning_link();
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        central.take_commands();

        link.on_connected(tracker());
        assert_eq!(link.state(), LinkState::Discovering);
        assert_eq!(
            central.take_commands(),
            [CentralCommand::DiscoverServices(tracker())]
        );

        link.on_services_discovered(tracker(), Ok(vec![ServiceId(1), ServiceId(2)]));
        assert_eq!(
            central.take_commands(),
            [
                CentralCommand::DiscoverCharacteristics(tracker(), ServiceId(1)),
                CentralCommand::DiscoverCharacteristics(tracker(), ServiceId(2)),
            ]
        );

        let battery = CharacteristicRef {
            service: ServiceId(1),
            id: 3,
            uuid: bluetooth_uuid_from_u16(0x2A19),
        };
        link.on_characteristics_discovered(tracker(), ServiceId(1), Ok(vec![battery]));
        assert_eq!(link.state(), LinkState::Discovering);

        let location = CharacteristicRef {
            service: ServiceId(2),
            ..location_char()
        };
        link.on_characteristics_discovered(tracker(), ServiceId(2), Ok(vec![location]));
        assert_eq!(link.state(), LinkState::Subscribed);
        assert_eq!(
            central.take_commands(),
            [
                CentralCommand::ReadValue(tracker(), location),
                CentralCommand::SetNotify(tracker(), location, true),
            ]
        );
    }

    #[test]
    fn test_missing_characteristic_stays_connected() {
        let (mut link, central, _) = scanning_link();
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        link.on_connected(tracker());
        link.on_services_discovered(tracker(), Ok(vec![ServiceId(1)]));
        central.take_commands();

        link.on_characteristics_discovered(tracker(), ServiceId(1), Ok(vec![]));
        assert_eq!(link.state(), LinkState::Discovering);
        assert!(central.take_commands().is_empty());
    }

    #[test]
    fn test_discovery_error_cancels_connection() {
        let (mut link, central, _) = scanning_link();
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        link.on_connected(tracker());
        central.take_commands();

        link.on_services_discovered(tracker(), Err("GATT error".into()));
        assert_eq!(
            central.take_commands(),
            [CentralCommand::CancelConnection(tracker())]
        );

        link.on_disconnected(tracker(), None);
        assert_eq!(link.state(), LinkState::Scanning);
    }

    #[test]
    fn test_characteristic_error_before_subscribing_cancels_connection() {
        let (mut link, central, _) = scanning_link();
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        link.on_connected(tracker());
        link.on_services_discovered(tracker(), Ok(vec![ServiceId(1)]));
        central.take_commands();

        link.on_characteristics_discovered(tracker(), ServiceId(1), Err("unknown device".into()));
        assert_eq!(
            central.take_commands(),
            [CentralCommand::CancelConnection(tracker())]
        );
        link.on_disconnected(tracker(), None);
        assert_eq!(link.state(), LinkState::Scanning);
    }

    #[test]
    fn test_unrelated_service_error_keeps_subscription() {
        let (mut link, central, _) = scanning_link();
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        link.on_connected(tracker());
        link.on_services_discovered(tracker(), Ok(vec![ServiceId(1), ServiceId(2)]));
        link.on_characteristics_discovered(tracker(), ServiceId(1), Ok(vec![location_char()]));
        assert_eq!(link.state(), LinkState::Subscribed);
        central.take_commands();

        link.on_characteristics_discovered(tracker(), ServiceId(2), Err("GATT error".into()));
        assert!(central.take_commands().is_empty());
        assert_eq!(link.state(), LinkState::Subscribed);
    }

    #[test]
    fn test_disconnect_resumes_scanning() {
        let (mut link, central, _) = subscribed_link();
        link.on_disconnected(tracker(), Some("link supervision timeout".into()));

        assert_eq!(link.state(), LinkState::Scanning);
        assert_eq!(central.take_commands(), [CentralCommand::StartScan]);

        // The same tracker is picked up again.
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        assert_eq!(link.state(), LinkState::Connecting);
    }

    #[test]
    fn test_failed_connect_resumes_scanning() {
        let (mut link, central, _) = scanning_link();
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        central.take_commands();

        link.on_disconnected(tracker(), Some("connection refused".into()));
        assert_eq!(link.state(), LinkState::Scanning);
        assert_eq!(central.take_commands(), [CentralCommand::StartScan]);
    }

    #[test]
    fn test_notifications_assemble_location() {
        let (mut link, _, sink) = subscribed_link();
        for payload in ["Lat:500000000", "garbage", "Lon:-1000000000", "Alt:12.5"] {
            link.on_value_updated(tracker(), location_char(), Ok(payload.as_bytes().to_vec()));
        }

        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert!((published[0].latitude - 50.0).abs() < 1e-9);
        assert!((published[0].longitude + 100.0).abs() < 1e-9);
        assert!((published[0].altitude - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_values_from_other_characteristics_are_ignored() {
        let (mut link, _, sink) = subscribed_link();
        let other = CharacteristicRef {
            uuid: bluetooth_uuid_from_u16(0x2A19),
            ..location_char()
        };
        for payload in ["Lat:1", "Lon:1", "Alt:1"] {
            link.on_value_updated(tracker(), other, Ok(payload.as_bytes().to_vec()));
        }
        link.on_value_updated(tracker(), location_char(), Err("read failed".into()));
        assert!(sink.published().is_empty());
    }

    #[test]
    fn test_unauthorized_does_not_scan() {
        let (mut link, central, _) = link_with(LinkConfig::default());
        link.on_adapter_state_changed(AdapterState::Unauthorized);
        assert_eq!(link.state(), LinkState::Unauthorized);
        assert!(central.take_commands().is_empty());

        // Authorization granted out of band, adapter reports power again.
        link.on_adapter_state_changed(AdapterState::PoweredOn);
        assert_eq!(link.state(), LinkState::Scanning);
    }

    #[test]
    fn test_power_off_drops_peripheral() {
        let (mut link, central, _) = subscribed_link();
        link.on_adapter_state_changed(AdapterState::PoweredOff);
        assert_eq!(link.state(), LinkState::PoweredOff);

        // A late disconnect for the old peripheral changes nothing.
        link.on_disconnected(tracker(), None);
        assert_eq!(link.state(), LinkState::PoweredOff);
        assert!(central.take_commands().is_empty());
    }

    #[test]
    fn test_scan_timeout_enters_idle_until_rescan() {
        let (mut link, central, _) = link_with(LinkConfig {
            scan_timeout: Some(Duration::from_secs(30)),
            ..LinkConfig::default()
        });
        link.on_adapter_state_changed(AdapterState::PoweredOn);
        assert!(link.deadline().is_some());
        central.take_commands();

        link.on_timeout();
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(central.take_commands(), [CentralCommand::StopScan]);

        // Power notifications do not restart scanning while idle.
        link.on_adapter_state_changed(AdapterState::PoweredOn);
        assert_eq!(link.state(), LinkState::Idle);

        link.rescan();
        assert_eq!(link.state(), LinkState::Scanning);
        assert_eq!(central.take_commands(), [CentralCommand::StartScan]);
    }

    #[test]
    fn test_connect_timeout_cancels_connection() {
        let (mut link, central, _) = link_with(LinkConfig {
            connect_timeout: Some(Duration::from_secs(10)),
            ..LinkConfig::default()
        });
        link.on_adapter_state_changed(AdapterState::PoweredOn);
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        assert!(link.deadline().is_some());
        central.take_commands();

        link.on_timeout();
        assert_eq!(
            central.take_commands(),
            [CentralCommand::CancelConnection(tracker())]
        );
        link.on_disconnected(tracker(), None);
        assert_eq!(link.state(), LinkState::Scanning);
    }

    #[test]
    fn test_subscribing_clears_connect_deadline() {
        let (mut link, _, _) = link_with(LinkConfig {
            connect_timeout: Some(Duration::from_secs(10)),
            ..LinkConfig::default()
        });
        link.on_adapter_state_changed(AdapterState::PoweredOn);
        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        link.on_connected(tracker());
        link.on_services_discovered(tracker(), Ok(vec![ServiceId(1)]));
        link.on_characteristics_discovered(tracker(), ServiceId(1), Ok(vec![location_char()]));
        assert!(link.deadline().is_none());
    }

    #[test]
    fn test_huge_timeouts_are_unbounded() {
        let (mut link, central, _) = link_with(LinkConfig {
            scan_timeout: Some(Duration::from_secs(u64::MAX)),
            connect_timeout: Some(Duration::from_secs(u64::MAX)),
            ..LinkConfig::default()
        });
        link.on_adapter_state_changed(AdapterState::PoweredOn);
        assert_eq!(link.state(), LinkState::Scanning);
        assert!(link.deadline().is_none());
        assert_eq!(central.take_commands(), [CentralCommand::StartScan]);

        link.on_device_discovered(tracker(), Some(DEFAULT_TARGET_NAME.into()));
        assert_eq!(link.state(), LinkState::Connecting);
        assert!(link.deadline().is_none());
    }

    #[test]
    fn test_rescan_ignored_unless_idle() {
        let (mut link, central, _) = scanning_link();
        link.rescan();
        assert!(central.take_commands().is_empty());
        assert_eq!(link.state(), LinkState::Scanning);
    }

    #[tokio::test]
    async fn test_run_loop_processes_events_and_timeouts() {
        let (link, central, _) = link_with(LinkConfig {
            scan_timeout: Some(Duration::from_millis(30)),
            ..LinkConfig::default()
        });
        let handle = link.handle();
        let (events, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(link.run(rx));

        events
            .send(CentralEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .unwrap();

        let mut states = handle.watch();
        tokio::time::timeout(
            Duration::from_secs(2),
            states.wait_for(|s| *s == LinkState::Idle),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(
            central.take_commands(),
            [CentralCommand::StartScan, CentralCommand::StopScan]
        );

        assert!(handle.rescan());
        tokio::time::timeout(Duration::from_secs(2), states.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            central.take_commands().first(),
            Some(&CentralCommand::StartScan)
        );

        drop(events);
        task.await.unwrap();
        assert!(!handle.rescan());
    }
}
