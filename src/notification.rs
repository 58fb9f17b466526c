use async_trait::async_trait;
use serde::Serialize;
use serde_with::serde_as;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{instrument, trace};

use crate::hw::normalise_uuid;

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// A characteristic value change reported by a device.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ValueChangeEvent {
    device_id: String,
    service_uuid: String,
    characteristic_uuid: String,
    #[serde_as(as = "serde_with::hex::Hex")]
    value: Vec<u8>,
}

impl ValueChangeEvent {
    /// Creates a value-change event.
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        service_uuid: &str,
        characteristic_uuid: &str,
        value: Vec<u8>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            service_uuid: normalise_uuid(service_uuid),
            characteristic_uuid: normalise_uuid(characteristic_uuid),
            value,
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    #[must_use]
    pub fn characteristic_uuid(&self) -> &str {
        &self.characteristic_uuid
    }

    /// Returns the raw value bytes.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Returns the value decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn value_text(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// Outbound delivery of value changes to interested subscribers.
///
/// Delivery is fire-and-forget: there is no acknowledgement contract.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn push(&self, device_id: &str, event: ValueChangeEvent);
}

/// Sink fanning value changes out to any number of streaming subscribers.
///
/// Subscribers that fall behind by more than the channel capacity miss the
/// oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ValueChangeEvent>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Opens a stream of every value change pushed after this call.
    #[must_use]
    pub fn subscribe(&self) -> BroadcastStream<ValueChangeEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    #[instrument(skip(self, event), level = "trace", fields(characteristic = %event.characteristic_uuid()))]
    async fn push(&self, device_id: &str, event: ValueChangeEvent) {
        if self.tx.send(event).is_err() {
            trace!("dropping value change with no subscribers");
        }
    }
}
