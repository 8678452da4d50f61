//! BlueZ binding of [`Central`] using `bluer`.
//!
//! Every command spawns a task that performs the D-Bus calls and reports the
//! outcome as a [`CentralEvent`]. Per-peripheral tasks (the connection watcher
//! and notification streams) are tracked so `cancel_connection` and
//! `stop_scan` can abort them.

use std::collections::HashMap;
use std::time::Duration;

use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, Device, DeviceEvent, DeviceProperty,
    DiscoveryFilter, DiscoveryTransport, ErrorKind, Session,
};
use futures::{pin_mut, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    AdapterState, Central, CentralEvent, CharacteristicRef, LinkError, PeripheralId, ServiceId,
};

const SERVICES_RESOLVE_POLL: Duration = Duration::from_millis(100);
const SERVICES_RESOLVE_ATTEMPTS: u32 = 100;
const UNKNOWN_DEVICE: &str = "unknown device";

impl From<bluer::Error> for LinkError {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            ErrorKind::NotAuthorized | ErrorKind::NotPermitted => Self::Unauthorized,
            ErrorKind::NotSupported => Self::Unsupported,
            ErrorKind::NotReady | ErrorKind::NotAvailable => {
                Self::AdapterUnavailable(err.message)
            }
            _ => Self::Stack(err.to_string()),
        }
    }
}

type EventSender = mpsc::UnboundedSender<CentralEvent>;

/// [`Central`] backed by the system's default BlueZ adapter.
pub struct BluezCentral {
    _session: Session,
    adapter: Adapter,
    events: EventSender,
    adapter_watch: JoinHandle<()>,
    scan: Option<JoinHandle<()>>,
    links: HashMap<PeripheralId, Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BluezCentral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezCentral")
            .field("adapter", &self.adapter.name())
            .field("scanning", &self.scan.is_some())
            .field("peripherals", &self.links.len())
            .finish_non_exhaustive()
    }
}

impl BluezCentral {
    /// Open the default adapter and report its initial power state.
    ///
    /// # Errors
    ///
    /// Returns an error if BlueZ is unreachable or has no adapter.
    pub async fn open(events: EventSender) -> Result<Self, LinkError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        let powered = adapter.is_powered().await?;
        info!(adapter = adapter.name(), powered, "Using Bluetooth adapter");

        let initial = if powered {
            AdapterState::PoweredOn
        } else {
            AdapterState::PoweredOff
        };
        let _ = events.send(CentralEvent::AdapterStateChanged(initial));

        let adapter_watch = tokio::spawn(watch_adapter(adapter.clone(), events.clone()));

        Ok(Self {
            _session: session,
            adapter,
            events,
            adapter_watch,
            scan: None,
            links: HashMap::new(),
        })
    }

    fn device(&self, peripheral: &PeripheralId) -> Option<Device> {
        let address: Address = match peripheral.0.parse() {
            Ok(address) => address,
            Err(e) => {
                warn!(%peripheral, error = %e, "Not a Bluetooth address");
                return None;
            }
        };
        match self.adapter.device(address) {
            Ok(device) => Some(device),
            Err(e) => {
                warn!(%peripheral, error = %e, "Device unavailable");
                None
            }
        }
    }

    fn track(&mut self, peripheral: &PeripheralId, task: JoinHandle<()>) {
        self.links.entry(peripheral.clone()).or_default().push(task);
    }

    fn abort_link(&mut self, peripheral: &PeripheralId) {
        for task in self.links.remove(peripheral).unwrap_or_default() {
            task.abort();
        }
    }

    fn emit(&self, event: CentralEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for BluezCentral {
    fn drop(&mut self) {
        self.adapter_watch.abort();
        if let Some(scan) = self.scan.take() {
            scan.abort();
        }
        for task in self.links.drain().flat_map(|(_, tasks)| tasks) {
            task.abort();
        }
    }
}

async fn watch_adapter(adapter: Adapter, events: EventSender) {
    let stream = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Cannot watch adapter state");
            return;
        }
    };
    pin_mut!(stream);

    while let Some(event) = stream.next().await {
        if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
            let state = if powered {
                AdapterState::PoweredOn
            } else {
                AdapterState::PoweredOff
            };
            if events.send(CentralEvent::AdapterStateChanged(state)).is_err() {
                break;
            }
        }
    }
}

async fn scan(adapter: Adapter, events: EventSender) -> bluer::Result<()> {
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            ..DiscoveryFilter::default()
        })
        .await?;
    let discovered = adapter.discover_devices().await?;
    pin_mut!(discovered);

    while let Some(event) = discovered.next().await {
        if let AdapterEvent::DeviceAdded(address) = event {
            let name = match adapter.device(address) {
                Ok(device) => device.name().await.unwrap_or(None),
                Err(_) => None,
            };
            let event = CentralEvent::DeviceDiscovered {
                peripheral: PeripheralId(address.to_string()),
                name,
            };
            if events.send(event).is_err() {
                break;
            }
        }
    }
    Ok(())
}

async fn connect_and_watch(
    device: Device,
    peripheral: PeripheralId,
    events: EventSender,
) -> bluer::Result<()> {
    let changes = device.events().await?;
    device.connect().await?;
    let _ = events.send(CentralEvent::Connected(peripheral.clone()));

    pin_mut!(changes);
    while let Some(change) = changes.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = change {
            break;
        }
    }
    let _ = events.send(CentralEvent::Disconnected {
        peripheral,
        error: None,
    });
    Ok(())
}

/// Poll `resolved` until it reports true, giving up after `attempts` polls.
async fn wait_until_resolved<F, Fut>(
    mut resolved: F,
    attempts: u32,
    interval: Duration,
) -> Result<(), LinkError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bluer::Result<bool>>,
{
    for attempt in 0..attempts {
        if resolved().await? {
            return Ok(());
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(LinkError::Stack(format!(
        "services not resolved after {attempts} attempts"
    )))
}

async fn discover_services(device: &Device) -> Result<Vec<ServiceId>, LinkError> {
    wait_until_resolved(
        move || device.is_services_resolved(),
        SERVICES_RESOLVE_ATTEMPTS,
        SERVICES_RESOLVE_POLL,
    )
    .await?;
    let services = device.services().await?;
    Ok(services.iter().map(|service| ServiceId(service.id())).collect())
}

async fn discover_characteristics(
    device: &Device,
    service: ServiceId,
) -> bluer::Result<Vec<CharacteristicRef>> {
    let mut found = Vec::new();
    for characteristic in device.service(service.0).await?.characteristics().await? {
        found.push(CharacteristicRef {
            service,
            id: characteristic.id(),
            uuid: characteristic.uuid().await?,
        });
    }
    Ok(found)
}

async fn characteristic(
    device: &Device,
    reference: &CharacteristicRef,
) -> bluer::Result<bluer::gatt::remote::Characteristic> {
    device
        .service(reference.service.0)
        .await?
        .characteristic(reference.id)
        .await
}

async fn stream_notifications(
    device: Device,
    peripheral: PeripheralId,
    reference: CharacteristicRef,
    events: EventSender,
) -> bluer::Result<()> {
    let values = characteristic(&device, &reference).await?.notify().await?;
    pin_mut!(values);
    while let Some(value) = values.next().await {
        let event = CentralEvent::ValueUpdated {
            peripheral: peripheral.clone(),
            characteristic: reference,
            value: Ok(value),
        };
        if events.send(event).is_err() {
            break;
        }
    }
    debug!(%peripheral, "Notification stream ended");
    Ok(())
}

impl Central for BluezCentral {
    fn start_scan(&mut self) {
        self.stop_scan();
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.scan = Some(tokio::spawn(async move {
            if let Err(e) = scan(adapter, events.clone()).await {
                warn!(error = %e, "Scan failed");
                if matches!(LinkError::from(e), LinkError::Unauthorized) {
                    let _ = events.send(CentralEvent::AdapterStateChanged(
                        AdapterState::Unauthorized,
                    ));
                }
            }
        }));
    }

    fn stop_scan(&mut self) {
        // Dropping the discovery stream ends discovery.
        if let Some(scan) = self.scan.take() {
            scan.abort();
        }
    }

    fn connect(&mut self, peripheral: &PeripheralId) {
        let Some(device) = self.device(peripheral) else {
            self.emit(CentralEvent::Disconnected {
                peripheral: peripheral.clone(),
                error: Some(UNKNOWN_DEVICE.into()),
            });
            return;
        };
        let events = self.events.clone();
        let id = peripheral.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = connect_and_watch(device, id.clone(), events.clone()).await {
                let _ = events.send(CentralEvent::Disconnected {
                    peripheral: id,
                    error: Some(e.to_string()),
                });
            }
        });
        self.track(peripheral, task);
    }

    fn cancel_connection(&mut self, peripheral: &PeripheralId) {
        self.abort_link(peripheral);
        if let Some(device) = self.device(peripheral) {
            tokio::spawn(async move {
                if let Err(e) = device.disconnect().await {
                    debug!(error = %e, "Disconnect failed");
                }
            });
        }
        self.emit(CentralEvent::Disconnected {
            peripheral: peripheral.clone(),
            error: None,
        });
    }

    fn discover_services(&mut self, peripheral: &PeripheralId) {
        let Some(device) = self.device(peripheral) else {
            self.emit(CentralEvent::ServicesDiscovered {
                peripheral: peripheral.clone(),
                services: Err(UNKNOWN_DEVICE.into()),
            });
            return;
        };
        let events = self.events.clone();
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            let services = discover_services(&device).await.map_err(|e| e.to_string());
            let _ = events.send(CentralEvent::ServicesDiscovered {
                peripheral,
                services,
            });
        });
    }

    fn discover_characteristics(&mut self, peripheral: &PeripheralId, service: ServiceId) {
        let Some(device) = self.device(peripheral) else {
            self.emit(CentralEvent::CharacteristicsDiscovered {
                peripheral: peripheral.clone(),
                service,
                characteristics: Err(UNKNOWN_DEVICE.into()),
            });
            return;
        };
        let events = self.events.clone();
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            let characteristics = discover_characteristics(&device, service)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(CentralEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            });
        });
    }

    fn read_value(&mut self, peripheral: &PeripheralId, reference: &CharacteristicRef) {
        let Some(device) = self.device(peripheral) else {
            self.emit(CentralEvent::ValueUpdated {
                peripheral: peripheral.clone(),
                characteristic: *reference,
                value: Err(UNKNOWN_DEVICE.into()),
            });
            return;
        };
        let events = self.events.clone();
        let peripheral = peripheral.clone();
        let reference = *reference;
        tokio::spawn(async move {
            let value = match characteristic(&device, &reference).await {
                Ok(c) => c.read().await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            let _ = events.send(CentralEvent::ValueUpdated {
                peripheral,
                characteristic: reference,
                value,
            });
        });
    }

    fn set_notify(
        &mut self,
        peripheral: &PeripheralId,
        reference: &CharacteristicRef,
        enabled: bool,
    ) {
        if !enabled {
            // Streams end with the connection; there is no per-characteristic handle to drop.
            debug!(%peripheral, "Notifications are released on disconnect");
            return;
        }
        let Some(device) = self.device(peripheral) else {
            return;
        };
        let events = self.events.clone();
        let id = peripheral.clone();
        let reference = *reference;
        let task = tokio::spawn(async move {
            if let Err(e) = stream_notifications(device, id.clone(), reference, events).await {
                warn!(peripheral = %id, error = %e, "Cannot subscribe to notifications");
            }
        });
        self.track(peripheral, task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const POLL: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn test_resolution_succeeds_once_reported() {
        let polls = AtomicU32::new(0);
        let counter = &polls;
        let result = wait_until_resolved(
            move || async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) },
            10,
            POLL,
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unresolved_services_fail_discovery() {
        let polls = AtomicU32::new(0);
        let counter = &polls;
        let result = wait_until_resolved(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            },
            5,
            POLL,
        )
        .await;
        assert!(matches!(result, Err(LinkError::Stack(_))));
        assert_eq!(polls.load(Ordering::SeqCst), 5);
    }
}
