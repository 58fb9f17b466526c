use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::discovery::DiscoveryCache;
use super::registry::{DeviceRegistry, RegisteredAdapter, Upsert};
use super::resolver::GattResolver;
use crate::hw::{AdapterEvent, AdapterId, DispatchMessage};
use crate::notification::{NotificationSink, ValueChangeEvent};

/// Errors raised while applying a single adapter event.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DispatchError {
    #[error("event came from unregistered adapter {adapter}")]
    UnknownAdapter { adapter: AdapterId },
    #[error("notification worker has stopped")]
    NotificationWorkerStopped,
}

/// Forgets everything known about a device after it disconnects.
///
/// Shared by the adapter's Disconnected event and explicit disconnect or unpair
/// commands, so running it twice is harmless.
pub(crate) fn forget_device(
    registry: &DeviceRegistry,
    discovery: &DiscoveryCache,
    resolver: &GattResolver,
    device_id: &str,
) {
    let removed = registry.remove(device_id).is_some();
    discovery.forget_on_disconnect(device_id);
    resolver.invalidate(device_id);
    debug!(device_id, removed, "device forgotten");
}

/// Applies adapter events to the registry, discovery cache and resolver, and
/// forwards value changes to the notification worker.
pub(crate) struct EventDispatcher {
    adapters: HashMap<AdapterId, RegisteredAdapter>,
    registry: Arc<DeviceRegistry>,
    discovery: Arc<DiscoveryCache>,
    resolver: Arc<GattResolver>,
    notifications: mpsc::UnboundedSender<ValueChangeEvent>,
}

impl EventDispatcher {
    pub(crate) fn new(
        adapters: &[RegisteredAdapter],
        registry: Arc<DeviceRegistry>,
        discovery: Arc<DiscoveryCache>,
        resolver: Arc<GattResolver>,
        notifications: mpsc::UnboundedSender<ValueChangeEvent>,
    ) -> Self {
        Self {
            adapters: adapters
                .iter()
                .map(|adapter| (adapter.id(), adapter.clone()))
                .collect(),
            registry,
            discovery,
            resolver,
            notifications,
        }
    }

    /// Processes messages in arrival order until cancelled or every sender is gone.
    pub(crate) async fn run(
        self,
        mut messages: mpsc::UnboundedReceiver<DispatchMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = messages.recv() => message,
            };
            match message {
                Some(DispatchMessage::Event { adapter, event }) => {
                    if let Err(error) = self.dispatch(adapter, event) {
                        warn!(%error, "dropping adapter event");
                    }
                }
                Some(DispatchMessage::Barrier(done)) => {
                    let _ = done.send(());
                }
                None => break,
            }
        }
        info!("event dispatcher stopped");
    }

    #[instrument(skip(self, adapter, event), level = "debug", fields(%adapter, kind = event.kind(), device_id = event.device_id()))]
    pub(crate) fn dispatch(&self, adapter: AdapterId, event: AdapterEvent) -> Result<(), DispatchError> {
        let source = self
            .adapters
            .get(&adapter)
            .ok_or(DispatchError::UnknownAdapter { adapter })?;

        match event {
            AdapterEvent::Discovered(device) => {
                self.discovery.put(source, device);
            }
            AdapterEvent::Connected(device) => {
                let device_id = device.id().to_string();
                if self.registry.upsert_on_connect(source, device) == Upsert::AdapterChanged {
                    // Handles resolved through the previous adapter carry its sessions.
                    self.resolver.invalidate(&device_id);
                    info!("device moved to another adapter");
                }
            }
            AdapterEvent::Disconnected(device) => {
                forget_device(&self.registry, &self.discovery, &self.resolver, device.id());
            }
            AdapterEvent::ValueChanged(value) => {
                self.notifications
                    .send(value)
                    .map_err(|_closed| DispatchError::NotificationWorkerStopped)?;
            }
        }
        Ok(())
    }
}

/// Delivers value changes to the sink away from the dispatch loop, so a slow
/// subscriber never delays adapter event processing.
pub(crate) async fn run_notification_worker(
    sink: Arc<dyn NotificationSink>,
    mut events: mpsc::UnboundedReceiver<ValueChangeEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        trace!(device_id = event.device_id(), "delivering value change");
        let device_id = event.device_id().to_string();
        tokio::select! {
            () = cancel.cancelled() => break,
            () = sink.push(&device_id, event) => {}
        }
    }
    debug!("notification worker stopped");
}
