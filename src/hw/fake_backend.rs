use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, instrument};

use super::adapter::{AdapterEvent, BleAdapter, EventSender};
use super::model::{
    CharacteristicHandle, Device, GattCharacteristic, GattService, ServiceHandle, SessionId,
};
use crate::error::{AdapterError, FixtureError};
use crate::notification::ValueChangeEvent;

const DEFAULT_ADAPTER_NAME: &str = "fake0";
const DEFAULT_READ_VALUE: [u8; 1] = [0x64];
const DEFAULT_NOTIFICATIONS: [[u8; 1]; 2] = [[0x63], [0x62]];

const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
const BATTERY_LEVEL: &str = "00002a19-0000-1000-8000-00805f9b34fb";
const DEVICE_INFORMATION_SERVICE: &str = "0000180a-0000-1000-8000-00805f9b34fb";
const MANUFACTURER_NAME: &str = "00002a29-0000-1000-8000-00805f9b34fb";
const SERIAL_SERVICE: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";
const SERIAL_DATA: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

/// Parsed fake discovery fixture: `adapter|device_id|name` records separated by `;`.
///
/// A name of `-` means the device does not advertise one.
#[derive(Debug, Clone)]
pub(crate) struct ScanFixture {
    records: Vec<(String, Device)>,
}

impl ScanFixture {
    /// Groups devices by adapter name, keeping first-seen adapter order.
    pub(crate) fn by_adapter(self) -> Vec<(String, Vec<Device>)> {
        let mut grouped: Vec<(String, Vec<Device>)> = Vec::new();
        for (adapter, device) in self.records {
            match grouped.iter_mut().find(|(name, _)| *name == adapter) {
                Some((_, devices)) => devices.push(device),
                None => grouped.push((adapter, vec![device])),
            }
        }
        grouped
    }
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }
        let records = value
            .split(';')
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { records })
    }
}

/// Parsed hex payload, whitespace tolerated.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct HexPayload {
    payload: Vec<u8>,
}

impl FromStr for HexPayload {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payload = parse_hex(value)?;
        Ok(Self { payload })
    }
}

/// Comma separated hex payloads emitted as value changes.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self {
                payloads: Vec::new(),
            });
        }
        let payloads = value.split(',').map(parse_hex).collect::<Result<_, _>>()?;
        Ok(Self { payloads })
    }
}

/// Number of times each adapter operation was invoked.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct FakeCalls {
    pub start: usize,
    pub connect: usize,
    pub gatt_services: usize,
    pub resolve_service: usize,
    pub resolve_characteristic: usize,
    pub read: usize,
    pub write: usize,
    pub enable_notifications: usize,
    pub disconnect: usize,
    pub unpair: usize,
}

#[derive(Debug, Default)]
struct FakeState {
    events: Option<EventSender>,
    known: HashMap<String, Device>,
    sessions: HashMap<String, SessionId>,
    ended: HashMap<String, SessionId>,
    last_session: u64,
    values: HashMap<(String, String), Vec<u8>>,
    calls: FakeCalls,
}

impl FakeState {
    fn start_session(&mut self, device_id: &str) -> SessionId {
        self.last_session += 1;
        let session = SessionId::new(self.last_session);
        self.sessions.insert(device_id.to_string(), session);
        session
    }

    fn resume_session(&mut self, device_id: &str, reuse: bool) -> SessionId {
        match self.ended.remove(device_id).filter(|_| reuse) {
            Some(session) => {
                self.sessions.insert(device_id.to_string(), session);
                session
            }
            None => self.start_session(device_id),
        }
    }
}

/// In-memory adapter driven by fixtures, used by tests and the CLI `--fake` mode.
///
/// ```
/// let adapter = blehub::FakeAdapter::builder().name("hci9").build();
/// assert_eq!(0, adapter.calls().connect);
/// ```
#[derive(Debug, Builder)]
pub struct FakeAdapter {
    #[builder(into, default = DEFAULT_ADAPTER_NAME.to_string())]
    name: String,
    /// Devices reported as discovered once the adapter starts.
    #[builder(default)]
    devices: Vec<Device>,
    /// Service layout every connected device exposes.
    #[builder(default = default_services())]
    services: Vec<GattService>,
    /// Value returned by reads of characteristics that were never written.
    #[builder(default = DEFAULT_READ_VALUE.to_vec())]
    read_value: Vec<u8>,
    /// Payloads emitted as value changes when notifications are enabled.
    #[builder(default = DEFAULT_NOTIFICATIONS.map(Vec::from).to_vec())]
    notifications: Vec<Vec<u8>>,
    /// When false, `start` fails as if the radio were powered off.
    #[builder(default = true)]
    start_status: bool,
    #[builder(default = true)]
    read_status: bool,
    #[builder(default = true)]
    write_status: bool,
    #[builder(default = true)]
    notify_status: bool,
    #[builder(default = true)]
    disconnect_status: bool,
    #[builder(default = true)]
    unpair_status: bool,
    /// Hands a reconnecting device the session id it had before disconnecting,
    /// like stacks that recycle connection handles.
    #[builder(default)]
    reuse_sessions: bool,
    /// Artificial delay applied to every radio call.
    #[builder(default)]
    latency: Duration,
    #[builder(skip)]
    state: Mutex<FakeState>,
}

impl FakeAdapter {
    /// Returns a snapshot of the per-operation call counters.
    #[must_use]
    pub fn calls(&self) -> FakeCalls {
        self.state.lock().calls
    }

    /// Marks a device as connected without emitting any event.
    pub fn add_connected_device(&self, device: Device) {
        let mut state = self.state.lock();
        state.start_session(device.id());
        state.known.insert(device.id().to_string(), device);
    }

    /// Simulates a silent reconnect: the device gets a new session and every
    /// handle resolved under the old one becomes stale.
    pub fn expire_session(&self, device_id: &str) {
        let mut state = self.state.lock();
        if state.sessions.contains_key(device_id) {
            let session = state.start_session(device_id);
            debug!(device_id, session = session.value(), "fake session expired");
        }
    }

    /// Ends the device's session without emitting a disconnection event.
    pub fn drop_session(&self, device_id: &str) {
        self.end_session(device_id);
    }

    /// Emits a discovery event as if an advertisement was received.
    ///
    /// # Errors
    ///
    /// Returns an error when the adapter was not started or the dispatcher stopped.
    pub fn emit_discovered(&self, device: Device) -> Result<(), AdapterError> {
        self.state
            .lock()
            .known
            .insert(device.id().to_string(), device.clone());
        self.emit(AdapterEvent::Discovered(device))
    }

    /// Emits a connection event, starting a new session for the device.
    ///
    /// # Errors
    ///
    /// Returns an error when the adapter was not started or the dispatcher stopped.
    pub fn emit_connected(&self, device: Device) -> Result<(), AdapterError> {
        {
            let mut state = self.state.lock();
            state.resume_session(device.id(), self.reuse_sessions);
            state.known.insert(device.id().to_string(), device.clone());
        }
        self.emit(AdapterEvent::Connected(device))
    }

    /// Emits a disconnection event, ending the device's session.
    ///
    /// # Errors
    ///
    /// Returns an error when the adapter was not started or the dispatcher stopped.
    pub fn emit_disconnected(&self, device_id: &str) -> Result<(), AdapterError> {
        let device = self.end_session(device_id);
        self.emit(AdapterEvent::Disconnected(device))
    }

    /// Emits a value change.
    ///
    /// # Errors
    ///
    /// Returns an error when the adapter was not started or the dispatcher stopped.
    pub fn emit_value_changed(&self, event: ValueChangeEvent) -> Result<(), AdapterError> {
        self.emit(AdapterEvent::ValueChanged(event))
    }

    fn emit(&self, event: AdapterEvent) -> Result<(), AdapterError> {
        let events = self
            .state
            .lock()
            .events
            .clone()
            .ok_or(AdapterError::EventChannelClosed)?;
        events.emit(event)
    }

    fn end_session(&self, device_id: &str) -> Device {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.remove(device_id) {
            state.ended.insert(device_id.to_string(), session);
        }
        state
            .known
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| Device::new(device_id, None))
    }

    fn active_session(&self, device_id: &str) -> Result<SessionId, AdapterError> {
        self.state
            .lock()
            .sessions
            .get(device_id)
            .copied()
            .ok_or_else(|| AdapterError::NotConnected {
                device_id: device_id.to_string(),
            })
    }

    fn ensure_live(&self, characteristic: &CharacteristicHandle) -> Result<(), AdapterError> {
        if self.is_session_active(characteristic.device_id(), characteristic.session()) {
            Ok(())
        } else {
            Err(AdapterError::NotConnected {
                device_id: characteristic.device_id().to_string(),
            })
        }
    }

    fn services_for(&self, device_id: &str) -> Vec<GattService> {
        self.services
            .iter()
            .map(|service| {
                GattService::new(service.uuid(), device_id, service.characteristics().to_vec())
            })
            .collect()
    }

    fn count(&self, record: impl FnOnce(&mut FakeCalls)) {
        record(&mut self.state.lock().calls);
    }

    async fn radio_delay(&self) {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, events: EventSender) -> Result<(), AdapterError> {
        {
            let mut state = self.state.lock();
            state.calls.start += 1;
            if !self.start_status {
                return Err(AdapterError::Unavailable {
                    adapter: self.name.clone(),
                });
            }
            state.events = Some(events);
            for device in &self.devices {
                state
                    .known
                    .entry(device.id().to_string())
                    .or_insert_with(|| device.clone());
            }
        }
        for device in &self.devices {
            self.emit(AdapterEvent::Discovered(device.clone()))?;
        }
        Ok(())
    }

    async fn discovered_devices(&self) -> Result<Vec<Device>, AdapterError> {
        Ok(self.devices.clone())
    }

    #[instrument(skip(self), level = "debug", fields(adapter = %self.name))]
    async fn connect(&self, device_id: &str) -> Result<Device, AdapterError> {
        self.count(|calls| calls.connect += 1);
        self.radio_delay().await;
        let device = {
            let mut state = self.state.lock();
            let device = state.known.get(device_id).cloned().ok_or_else(|| {
                AdapterError::UnknownPeripheral {
                    adapter: self.name.clone(),
                    device_id: device_id.to_string(),
                }
            })?;
            state.resume_session(device_id, self.reuse_sessions);
            device
        };
        self.emit(AdapterEvent::Connected(device.clone()))?;
        Ok(device)
    }

    async fn gatt_services(&self, device_id: &str) -> Result<Vec<GattService>, AdapterError> {
        self.count(|calls| calls.gatt_services += 1);
        self.radio_delay().await;
        self.active_session(device_id)?;
        Ok(self.services_for(device_id))
    }

    async fn resolve_service(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<Option<ServiceHandle>, AdapterError> {
        self.count(|calls| calls.resolve_service += 1);
        self.radio_delay().await;
        let session = self.active_session(device_id)?;
        Ok(self
            .services_for(device_id)
            .into_iter()
            .find(|service| service.uuid().eq_ignore_ascii_case(service_uuid))
            .map(|service| ServiceHandle::new(service, session)))
    }

    async fn resolve_characteristic(
        &self,
        service: &ServiceHandle,
        characteristic_uuid: &str,
    ) -> Result<Option<CharacteristicHandle>, AdapterError> {
        self.count(|calls| calls.resolve_characteristic += 1);
        self.radio_delay().await;
        Ok(service
            .service()
            .characteristic(characteristic_uuid)
            .map(|characteristic| CharacteristicHandle::new(service, characteristic.clone())))
    }

    fn is_session_active(&self, device_id: &str, session: SessionId) -> bool {
        self.state.lock().sessions.get(device_id) == Some(&session)
    }

    #[instrument(skip(self, characteristic, payload), level = "debug", fields(characteristic = characteristic.uuid()))]
    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
    ) -> Result<bool, AdapterError> {
        self.count(|calls| calls.write += 1);
        self.radio_delay().await;
        self.ensure_live(characteristic)?;
        let writable = ["write", "write_without_response"]
            .iter()
            .any(|property| characteristic.characteristic().has_property(property));
        if !self.write_status || !writable {
            return Ok(false);
        }
        self.state.lock().values.insert(
            (
                characteristic.device_id().to_string(),
                characteristic.uuid().to_string(),
            ),
            payload.to_vec(),
        );
        Ok(true)
    }

    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Option<Vec<u8>>, AdapterError> {
        self.count(|calls| calls.read += 1);
        self.radio_delay().await;
        self.ensure_live(characteristic)?;
        if !self.read_status {
            return Ok(None);
        }
        let key = (
            characteristic.device_id().to_string(),
            characteristic.uuid().to_string(),
        );
        let value = self
            .state
            .lock()
            .values
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.read_value.clone());
        Ok(Some(value))
    }

    async fn enable_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<bool, AdapterError> {
        self.count(|calls| calls.enable_notifications += 1);
        self.radio_delay().await;
        self.ensure_live(characteristic)?;
        let notifies = ["notify", "indicate"]
            .iter()
            .any(|property| characteristic.characteristic().has_property(property));
        if !self.notify_status || !notifies {
            return Ok(false);
        }
        for payload in &self.notifications {
            self.emit(AdapterEvent::ValueChanged(ValueChangeEvent::new(
                characteristic.device_id(),
                characteristic.service_uuid(),
                characteristic.uuid(),
                payload.clone(),
            )))?;
        }
        Ok(true)
    }

    async fn disconnect(&self, device_id: &str) -> Result<bool, AdapterError> {
        self.count(|calls| calls.disconnect += 1);
        self.radio_delay().await;
        if !self.disconnect_status {
            return Ok(false);
        }
        let device = self.end_session(device_id);
        self.emit(AdapterEvent::Disconnected(device))?;
        Ok(true)
    }

    async fn unpair(&self, device_id: &str) -> Result<bool, AdapterError> {
        self.count(|calls| calls.unpair += 1);
        self.radio_delay().await;
        if !self.unpair_status {
            return Ok(false);
        }
        let device = self.end_session(device_id);
        self.state.lock().known.remove(device_id);
        self.emit(AdapterEvent::Disconnected(device))?;
        Ok(true)
    }
}

fn parse_scan_record(raw_record: &str) -> Result<(String, Device), FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [adapter, device_id, name] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if adapter.is_empty() || device_id.is_empty() || name.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let name = (*name != "-").then(|| (*name).to_string());
    Ok(((*adapter).to_string(), Device::new(*device_id, name)))
}

fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).map_err(|source| FixtureError::InvalidHex {
        value: cleaned,
        source,
    })
}

fn default_services() -> Vec<GattService> {
    let readable_notify = || vec!["read".to_string(), "notify".to_string()];
    vec![
        GattService::new(
            BATTERY_SERVICE,
            "",
            vec![GattCharacteristic::new(
                BATTERY_LEVEL,
                Some("Battery Level".to_string()),
                readable_notify(),
            )],
        ),
        GattService::new(
            DEVICE_INFORMATION_SERVICE,
            "",
            vec![GattCharacteristic::new(
                MANUFACTURER_NAME,
                None,
                vec!["read".to_string()],
            )],
        ),
        GattService::new(
            SERIAL_SERVICE,
            "",
            vec![GattCharacteristic::new(
                SERIAL_DATA,
                Some("Serial Data".to_string()),
                vec![
                    "read".to_string(),
                    "write".to_string(),
                    "write_without_response".to_string(),
                    "notify".to_string(),
                ],
            )],
        ),
    ]
}
