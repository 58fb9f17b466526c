use std::fmt;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::model::{CharacteristicHandle, Device, GattService, ServiceHandle, SessionId};
use crate::error::AdapterError;
use crate::notification::ValueChangeEvent;

/// Capability provider for one BLE radio or stack instance.
///
/// Implementations report discovery, connection and value-change activity by
/// emitting [`AdapterEvent`]s through the [`EventSender`] handed to
/// [`BleAdapter::start`]. Event emission must never block the caller.
#[async_trait]
pub trait BleAdapter: Send + Sync + fmt::Debug {
    /// Human-readable adapter name, e.g. `hci0`.
    fn name(&self) -> &str;

    /// Starts event delivery (and scanning, for radio-backed adapters).
    async fn start(&self, events: EventSender) -> Result<(), AdapterError>;

    /// Devices the adapter currently knows about from advertisements.
    async fn discovered_devices(&self) -> Result<Vec<Device>, AdapterError>;

    /// Connects to a device the adapter has discovered.
    async fn connect(&self, device_id: &str) -> Result<Device, AdapterError>;

    /// Enumerates every GATT service on a connected device.
    async fn gatt_services(&self, device_id: &str) -> Result<Vec<GattService>, AdapterError>;

    /// Resolves one service, returning `None` when the device has no match.
    async fn resolve_service(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<Option<ServiceHandle>, AdapterError>;

    /// Resolves one characteristic inside a previously resolved service.
    async fn resolve_characteristic(
        &self,
        service: &ServiceHandle,
        characteristic_uuid: &str,
    ) -> Result<Option<CharacteristicHandle>, AdapterError>;

    /// Returns whether `session` is still the live connection for `device_id`.
    fn is_session_active(&self, device_id: &str, session: SessionId) -> bool;

    /// Writes a value, returning the adapter's success status.
    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
    ) -> Result<bool, AdapterError>;

    /// Reads a value, returning `None` when the adapter reports a failed read.
    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Option<Vec<u8>>, AdapterError>;

    /// Enables value-change notifications for a characteristic.
    async fn enable_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<bool, AdapterError>;

    async fn disconnect(&self, device_id: &str) -> Result<bool, AdapterError>;

    async fn unpair(&self, device_id: &str) -> Result<bool, AdapterError>;
}

/// Index of an adapter within the manager's registered adapter set.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display)]
#[display("adapter#{_0}")]
pub struct AdapterId(pub(crate) usize);

/// Events pushed by adapters.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AdapterEvent {
    Discovered(Device),
    Connected(Device),
    Disconnected(Device),
    ValueChanged(ValueChangeEvent),
}

impl AdapterEvent {
    /// Returns the device the event concerns.
    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::Discovered(device) | Self::Connected(device) | Self::Disconnected(device) => {
                device.id()
            }
            Self::ValueChanged(event) => event.device_id(),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Discovered(_) => "discovered",
            Self::Connected(_) => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::ValueChanged(_) => "value_changed",
        }
    }
}

/// Messages consumed by the single dispatch loop.
#[derive(Debug)]
pub(crate) enum DispatchMessage {
    Event {
        adapter: AdapterId,
        event: AdapterEvent,
    },
    Barrier(oneshot::Sender<()>),
}

/// Non-blocking handle an adapter uses to emit events into the dispatcher.
#[derive(Debug, Clone)]
pub struct EventSender {
    adapter: AdapterId,
    tx: mpsc::UnboundedSender<DispatchMessage>,
}

impl EventSender {
    pub(crate) fn new(adapter: AdapterId, tx: mpsc::UnboundedSender<DispatchMessage>) -> Self {
        Self { adapter, tx }
    }

    /// Queues an event for dispatch without waiting for it to be processed.
    ///
    /// # Errors
    ///
    /// Returns an error once the dispatcher has shut down.
    pub fn emit(&self, event: AdapterEvent) -> Result<(), AdapterError> {
        self.tx
            .send(DispatchMessage::Event {
                adapter: self.adapter,
                event,
            })
            .map_err(|_closed| AdapterError::EventChannelClosed)
    }

    #[must_use]
    pub fn adapter(&self) -> AdapterId {
        self.adapter
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn emit_tags_events_with_the_source_adapter() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = EventSender::new(AdapterId(3), tx);

        sender
            .emit(AdapterEvent::Discovered(Device::new("AA:BB", None)))
            .expect("open channel should accept events");

        let message = rx.try_recv().expect("event should be queued");
        assert_matches!(
            message,
            DispatchMessage::Event { adapter, event: AdapterEvent::Discovered(device) }
            if adapter == AdapterId(3) && device.id() == "AA:BB"
        );
    }

    #[test]
    fn emit_fails_after_dispatcher_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sender = EventSender::new(AdapterId(0), tx);

        let result = sender.emit(AdapterEvent::Connected(Device::new("AA:BB", None)));
        assert_matches!(result, Err(AdapterError::EventChannelClosed));
    }

    #[test]
    fn adapter_id_displays_index() {
        assert_eq!("adapter#2", AdapterId(2).to_string());
    }
}
