use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification, WriteType, bleuuid::uuid_from_u16,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, trace, warn};

use super::adapter::{AdapterEvent, BleAdapter, EventSender};
use super::model::{
    CharacteristicHandle, Device, GattCharacteristic, GattService, ServiceHandle, SessionId,
};
use crate::error::{AdapterError, AdapterOperation};
use crate::notification::ValueChangeEvent;

/// Characteristic User Description descriptor.
const USER_DESCRIPTION_DESCRIPTOR: u16 = 0x2901;

/// Per-device connection generations, shared with the event forwarding task.
#[derive(Debug, Default)]
struct SessionTable {
    sessions: Mutex<HashMap<String, SessionId>>,
    last_session: AtomicU64,
}

impl SessionTable {
    /// Starts a session unless one is already live, returning the live session.
    fn ensure(&self, device_id: &str) -> SessionId {
        *self
            .sessions
            .lock()
            .entry(device_id.to_string())
            .or_insert_with(|| SessionId::new(self.last_session.fetch_add(1, Ordering::Relaxed) + 1))
    }

    fn end(&self, device_id: &str) -> Option<SessionId> {
        self.sessions.lock().remove(device_id)
    }

    fn current(&self, device_id: &str) -> Option<SessionId> {
        self.sessions.lock().get(device_id).copied()
    }
}

/// Adapter backed by one `btleplug` platform adapter.
#[derive(Debug)]
pub struct BtleplugAdapter {
    adapter: Adapter,
    name: String,
    sessions: Arc<SessionTable>,
    events: Mutex<Option<EventSender>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl BtleplugAdapter {
    /// Opens every platform adapter.
    ///
    /// Returns an empty list on hosts without Bluetooth hardware.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform BLE manager cannot be created.
    #[instrument(level = "debug")]
    pub async fn discover() -> Result<Vec<Self>, AdapterError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let mut discovered = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            debug!(adapter = %name, "found platform adapter");
            discovered.push(Self::new(adapter, name));
        }
        Ok(discovered)
    }

    fn new(adapter: Adapter, name: String) -> Self {
        Self {
            adapter,
            name,
            sessions: Arc::new(SessionTable::default()),
            events: Mutex::new(None),
            event_task: Mutex::new(None),
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    async fn peripheral(&self, device_id: &str) -> Result<Peripheral, AdapterError> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.id().to_string() == device_id)
            .ok_or_else(|| AdapterError::UnknownPeripheral {
                adapter: self.name.clone(),
                device_id: device_id.to_string(),
            })
    }

    fn live_session(&self, device_id: &str) -> Result<SessionId, AdapterError> {
        self.sessions
            .current(device_id)
            .ok_or_else(|| AdapterError::NotConnected {
                device_id: device_id.to_string(),
            })
    }

    fn ensure_live(&self, handle: &CharacteristicHandle) -> Result<(), AdapterError> {
        if self.is_session_active(handle.device_id(), handle.session()) {
            Ok(())
        } else {
            Err(AdapterError::NotConnected {
                device_id: handle.device_id().to_string(),
            })
        }
    }

    /// Looks up the platform characteristic behind a resolved handle.
    async fn platform_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Option<(Peripheral, Characteristic)>, AdapterError> {
        self.ensure_live(handle)?;
        let peripheral = self.peripheral(handle.device_id()).await?;
        let characteristic = peripheral.services().into_iter().find_map(|service| {
            if !service.uuid.to_string().eq_ignore_ascii_case(handle.service_uuid()) {
                return None;
            }
            service
                .characteristics
                .into_iter()
                .find(|candidate| candidate.uuid.to_string().eq_ignore_ascii_case(handle.uuid()))
        });
        Ok(characteristic.map(|characteristic| (peripheral, characteristic)))
    }

    fn spawn_notification_forwarder(
        &self,
        device_id: &str,
        peripheral: Peripheral,
        notifications: impl tokio_stream::Stream<Item = ValueNotification> + Send + Unpin + 'static,
        events: EventSender,
    ) {
        let mut forwarders = self.forwarders.lock();
        if forwarders
            .get(device_id)
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }
        let owned_id = device_id.to_string();
        let task = tokio::spawn(forward_notifications(
            owned_id.clone(),
            peripheral,
            notifications,
            events,
        ));
        forwarders.insert(owned_id, task);
    }
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.get_mut().take() {
            task.abort();
        }
        for (_, task) in self.forwarders.get_mut().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, events), level = "info", fields(adapter = %self.name))]
    async fn start(&self, events: EventSender) -> Result<(), AdapterError> {
        let central_events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        self.events.lock().replace(events.clone());
        let task = tokio::spawn(forward_central_events(
            self.adapter.clone(),
            self.sessions.clone(),
            central_events,
            events,
        ));
        if let Some(previous) = self.event_task.lock().replace(task) {
            previous.abort();
        }
        info!("scanning for peripherals");
        Ok(())
    }

    async fn discovered_devices(&self) -> Result<Vec<Device>, AdapterError> {
        let mut devices = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            devices.push(describe(&peripheral).await?);
        }
        Ok(devices)
    }

    #[instrument(skip(self), level = "debug", fields(adapter = %self.name))]
    async fn connect(&self, device_id: &str) -> Result<Device, AdapterError> {
        let peripheral = self.peripheral(device_id).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;
        let session = self.sessions.ensure(device_id);
        debug!(session = session.value(), "peripheral connected");
        describe(&peripheral).await
    }

    #[instrument(skip(self), level = "debug", fields(adapter = %self.name))]
    async fn gatt_services(&self, device_id: &str) -> Result<Vec<GattService>, AdapterError> {
        self.live_session(device_id)?;
        let peripheral = self.peripheral(device_id).await?;
        if peripheral.services().is_empty() {
            peripheral.discover_services().await?;
        }

        let mut services = Vec::new();
        for service in peripheral.services() {
            services.push(GattService::new(
                service.uuid.to_string(),
                device_id,
                describe_characteristics(&peripheral, &service.characteristics).await,
            ));
        }
        services.sort_by(|left, right| left.uuid().cmp(right.uuid()));
        Ok(services)
    }

    #[instrument(skip(self), level = "debug", fields(adapter = %self.name))]
    async fn resolve_service(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<Option<ServiceHandle>, AdapterError> {
        let session = self.live_session(device_id)?;
        let peripheral = self.peripheral(device_id).await?;
        if peripheral.services().is_empty() {
            peripheral.discover_services().await?;
        }
        let Some(service) = peripheral
            .services()
            .into_iter()
            .find(|service| service.uuid.to_string().eq_ignore_ascii_case(service_uuid))
        else {
            return Ok(None);
        };

        let characteristics = describe_characteristics(&peripheral, &service.characteristics).await;
        let service = GattService::new(service.uuid.to_string(), device_id, characteristics);
        Ok(Some(ServiceHandle::new(service, session)))
    }

    async fn resolve_characteristic(
        &self,
        service: &ServiceHandle,
        characteristic_uuid: &str,
    ) -> Result<Option<CharacteristicHandle>, AdapterError> {
        Ok(service
            .service()
            .characteristic(characteristic_uuid)
            .map(|characteristic| CharacteristicHandle::new(service, characteristic.clone())))
    }

    fn is_session_active(&self, device_id: &str, session: SessionId) -> bool {
        self.sessions.current(device_id) == Some(session)
    }

    #[instrument(skip(self, characteristic, payload), level = "debug", fields(characteristic = characteristic.uuid(), len = payload.len()))]
    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
    ) -> Result<bool, AdapterError> {
        let Some((peripheral, platform)) = self.platform_characteristic(characteristic).await?
        else {
            return Ok(false);
        };
        let Some(write_type) = write_type_for(platform.properties) else {
            debug!("characteristic is not writable");
            return Ok(false);
        };
        peripheral.write(&platform, payload, write_type).await?;
        Ok(true)
    }

    #[instrument(skip(self, characteristic), level = "debug", fields(characteristic = characteristic.uuid()))]
    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Option<Vec<u8>>, AdapterError> {
        let Some((peripheral, platform)) = self.platform_characteristic(characteristic).await?
        else {
            return Ok(None);
        };
        let value = peripheral.read(&platform).await?;
        trace!(len = value.len(), "characteristic read");
        Ok(Some(value))
    }

    #[instrument(skip(self, characteristic), level = "debug", fields(characteristic = characteristic.uuid()))]
    async fn enable_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<bool, AdapterError> {
        let Some((peripheral, platform)) = self.platform_characteristic(characteristic).await?
        else {
            return Ok(false);
        };
        if !platform
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            debug!("characteristic does not notify");
            return Ok(false);
        }

        let events = self
            .events
            .lock()
            .clone()
            .ok_or(AdapterError::EventChannelClosed)?;
        let notifications = peripheral.notifications().await?;
        peripheral.subscribe(&platform).await?;
        self.spawn_notification_forwarder(
            characteristic.device_id(),
            peripheral,
            notifications,
            events,
        );
        Ok(true)
    }

    #[instrument(skip(self), level = "debug", fields(adapter = %self.name))]
    async fn disconnect(&self, device_id: &str) -> Result<bool, AdapterError> {
        let peripheral = self.peripheral(device_id).await?;
        if peripheral.is_connected().await? {
            peripheral.disconnect().await?;
        }
        self.sessions.end(device_id);
        if let Some(task) = self.forwarders.lock().remove(device_id) {
            task.abort();
        }
        Ok(true)
    }

    async fn unpair(&self, _device_id: &str) -> Result<bool, AdapterError> {
        Err(AdapterError::Unsupported {
            adapter: self.name.clone(),
            operation: AdapterOperation::Unpair,
        })
    }
}

async fn forward_central_events(
    adapter: Adapter,
    sessions: Arc<SessionTable>,
    mut central_events: impl tokio_stream::Stream<Item = CentralEvent> + Send + Unpin,
    events: EventSender,
) {
    while let Some(event) = central_events.next().await {
        let forwarded = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                device_for(&adapter, &id).await.map(AdapterEvent::Discovered)
            }
            CentralEvent::DeviceConnected(id) => {
                let session = sessions.ensure(&id.to_string());
                trace!(session = session.value(), "connection observed");
                device_for(&adapter, &id).await.map(AdapterEvent::Connected)
            }
            CentralEvent::DeviceDisconnected(id) => {
                sessions.end(&id.to_string());
                let device = device_for(&adapter, &id)
                    .await
                    .unwrap_or_else(|| Device::new(id.to_string(), None));
                Some(AdapterEvent::Disconnected(device))
            }
            _ => None,
        };

        if let Some(event) = forwarded
            && events.emit(event).is_err()
        {
            debug!("dispatcher stopped, ending central event forwarding");
            break;
        }
    }
}

async fn forward_notifications(
    device_id: String,
    peripheral: Peripheral,
    mut notifications: impl tokio_stream::Stream<Item = ValueNotification> + Send + Unpin,
    events: EventSender,
) {
    while let Some(notification) = notifications.next().await {
        let characteristic_uuid = notification.uuid.to_string();
        let Some(service_uuid) = peripheral.services().into_iter().find_map(|service| {
            service
                .characteristics
                .iter()
                .any(|characteristic| characteristic.uuid == notification.uuid)
                .then(|| service.uuid.to_string())
        }) else {
            trace!(%characteristic_uuid, "notification for unknown characteristic");
            continue;
        };

        let event = ValueChangeEvent::new(
            device_id.clone(),
            &service_uuid,
            &characteristic_uuid,
            notification.value,
        );
        if events.emit(AdapterEvent::ValueChanged(event)).is_err() {
            break;
        }
    }
    debug!(device_id, "notification stream closed");
}

async fn device_for(adapter: &Adapter, id: &PeripheralId) -> Option<Device> {
    match adapter.peripheral(id).await {
        Ok(peripheral) => match describe(&peripheral).await {
            Ok(device) => Some(device),
            Err(error) => {
                warn!(%id, %error, "failed to read peripheral properties");
                None
            }
        },
        Err(error) => {
            debug!(%id, %error, "peripheral vanished before it could be described");
            None
        }
    }
}

async fn describe(peripheral: &Peripheral) -> Result<Device, AdapterError> {
    let name = peripheral
        .properties()
        .await?
        .and_then(|properties| properties.local_name);
    Ok(Device::new(peripheral.id().to_string(), name))
}

async fn describe_characteristics<'a>(
    peripheral: &Peripheral,
    characteristics: impl IntoIterator<Item = &'a Characteristic>,
) -> Vec<GattCharacteristic> {
    let mut described = Vec::new();
    for characteristic in characteristics {
        described.push(GattCharacteristic::new(
            characteristic.uuid.to_string(),
            user_description(peripheral, characteristic).await,
            property_labels(characteristic.properties),
        ));
    }
    described.sort_by(|left, right| left.uuid().cmp(right.uuid()));
    described
}

async fn user_description(peripheral: &Peripheral, characteristic: &Characteristic) -> Option<String> {
    let descriptor_uuid = uuid_from_u16(USER_DESCRIPTION_DESCRIPTOR);
    let descriptor = characteristic
        .descriptors
        .iter()
        .find(|descriptor| descriptor.uuid == descriptor_uuid)?;
    match peripheral.read_descriptor(descriptor).await {
        Ok(value) => Some(String::from_utf8_lossy(&value).trim_end_matches('\0').to_string()),
        Err(error) => {
            debug!(characteristic = %characteristic.uuid, %error, "failed to read user description");
            None
        }
    }
}

fn property_labels(flags: CharPropFlags) -> Vec<String> {
    let labels: Vec<String> = flags
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect();
    if labels.is_empty() {
        vec!["none".to_string()]
    } else {
        labels
    }
}

/// Acknowledged writes are preferred when the characteristic offers both.
fn write_type_for(properties: CharPropFlags) -> Option<WriteType> {
    if properties.contains(CharPropFlags::WRITE) {
        Some(WriteType::WithResponse)
    } else if properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        Some(WriteType::WithoutResponse)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CharPropFlags::WRITE, Some(WriteType::WithResponse))]
    #[case(CharPropFlags::WRITE_WITHOUT_RESPONSE, Some(WriteType::WithoutResponse))]
    #[case(
        CharPropFlags::WRITE_WITHOUT_RESPONSE | CharPropFlags::WRITE,
        Some(WriteType::WithResponse)
    )]
    #[case(CharPropFlags::READ, None)]
    fn write_type_prefers_acknowledged_writes(
        #[case] properties: CharPropFlags,
        #[case] expected: Option<WriteType>,
    ) {
        assert_eq!(expected, write_type_for(properties));
    }

    #[rstest]
    #[case(CharPropFlags::READ | CharPropFlags::NOTIFY, vec!["read", "notify"])]
    #[case(CharPropFlags::empty(), vec!["none"])]
    fn property_labels_are_lowercase_flag_names(
        #[case] flags: CharPropFlags,
        #[case] expected: Vec<&str>,
    ) {
        assert_eq!(expected, property_labels(flags));
    }

    #[test]
    fn session_table_keeps_live_session_until_ended() {
        let table = SessionTable::default();

        let first = table.ensure("AA:BB");
        assert_eq!(first, table.ensure("AA:BB"));

        assert_eq!(Some(first), table.end("AA:BB"));
        let second = table.ensure("AA:BB");

        assert!(second != first);
        assert_eq!(Some(second), table.current("AA:BB"));
    }
}
