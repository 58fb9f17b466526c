use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::error::DeviceError;
use crate::hw::{AdapterId, BleAdapter, ConnectionState, Device};

/// An adapter registered with the manager, tagged with its index.
#[derive(Debug, Clone)]
pub(crate) struct RegisteredAdapter {
    id: AdapterId,
    adapter: Arc<dyn BleAdapter>,
}

impl RegisteredAdapter {
    pub(crate) fn new(id: AdapterId, adapter: Arc<dyn BleAdapter>) -> Self {
        Self { id, adapter }
    }

    pub(crate) fn id(&self) -> AdapterId {
        self.id
    }

    pub(crate) fn adapter(&self) -> &dyn BleAdapter {
        self.adapter.as_ref()
    }
}

/// A device paired with the adapter that reported it.
#[derive(Debug, Clone)]
pub(crate) struct ProxiedDevice {
    device: Device,
    adapter: RegisteredAdapter,
}

impl ProxiedDevice {
    pub(crate) fn new(device: Device, adapter: RegisteredAdapter) -> Self {
        let device = device.with_adapter_name(adapter.adapter().name());
        Self { device, adapter }
    }

    pub(crate) fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn id(&self) -> &str {
        self.device.id()
    }

    pub(crate) fn adapter(&self) -> &dyn BleAdapter {
        self.adapter.adapter()
    }

    pub(crate) fn adapter_id(&self) -> AdapterId {
        self.adapter.id()
    }

    pub(crate) fn registered_adapter(&self) -> &RegisteredAdapter {
        &self.adapter
    }
}

/// Result of registering a connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Upsert {
    Inserted,
    AlreadyRegistered,
    AdapterChanged,
}

/// Authoritative set of connected devices.
///
/// Every operation takes the same lock and never holds it across an await.
#[derive(Debug, Default)]
pub(crate) struct DeviceRegistry {
    devices: Mutex<HashMap<String, ProxiedDevice>>,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a connected device. Repeated connects are no-ops unless the
    /// device moved to a different adapter, in which case routing follows it.
    #[instrument(skip(self, adapter, device), level = "debug", fields(device_id = device.id(), adapter = %adapter.id()))]
    pub(crate) fn upsert_on_connect(&self, adapter: &RegisteredAdapter, device: Device) -> Upsert {
        let mut devices = self.devices.lock();
        if let Some(existing) = devices.get_mut(device.id()) {
            if existing.adapter_id() == adapter.id() {
                debug!("ignoring duplicate connect");
                return Upsert::AlreadyRegistered;
            }
            *existing = ProxiedDevice::new(
                device.with_state(ConnectionState::Connected),
                adapter.clone(),
            );
            return Upsert::AdapterChanged;
        }

        let proxied = ProxiedDevice::new(
            device.with_state(ConnectionState::Connected),
            adapter.clone(),
        );
        devices.insert(proxied.id().to_string(), proxied);
        Upsert::Inserted
    }

    /// Removes a device, returning it if it was registered.
    pub(crate) fn remove(&self, device_id: &str) -> Option<ProxiedDevice> {
        self.devices.lock().remove(device_id)
    }

    pub(crate) fn get(&self, device_id: &str) -> Result<ProxiedDevice, DeviceError> {
        self.devices
            .lock()
            .get(device_id)
            .cloned()
            .ok_or_else(|| DeviceError::device_not_found(device_id))
    }

    /// Snapshot of every registered device, ordered by id.
    pub(crate) fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .lock()
            .values()
            .map(|proxied| proxied.device().clone())
            .collect();
        devices.sort_by(|left, right| left.id().cmp(right.id()));
        devices
    }

    pub(crate) fn len(&self) -> usize {
        self.devices.lock().len()
    }
}
