use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::config::ManagerConfig;
use super::discovery::DiscoveryCache;
use super::dispatcher::{EventDispatcher, forget_device, run_notification_worker};
use super::registry::{DeviceRegistry, ProxiedDevice, RegisteredAdapter};
use super::resolver::GattResolver;
use crate::error::{AdapterError, AdapterOperation, DeviceError};
use crate::hw::{
    AdapterId, BleAdapter, CharacteristicHandle, Device, DispatchMessage, EventSender,
    GattCharacteristic, GattService, normalise_uuid,
};
use crate::notification::NotificationSink;

/// Public entry point combining discovery, connection tracking, GATT
/// resolution and value-change delivery over any number of adapters.
///
/// Cloning is cheap; every clone drives the same state.
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    adapters: Vec<RegisteredAdapter>,
    registry: Arc<DeviceRegistry>,
    discovery: Arc<DiscoveryCache>,
    resolver: Arc<GattResolver>,
    dispatch_tx: mpsc::UnboundedSender<DispatchMessage>,
    config: ManagerConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceManager {
    /// Spawns the dispatch loop and notification worker, then starts every adapter.
    ///
    /// Must be called from within a Tokio runtime. An empty adapter set is
    /// valid: discovery stays empty and every device operation fails with
    /// [`DeviceError::DeviceNotFound`].
    ///
    /// # Errors
    ///
    /// Returns an error when an adapter fails to start.
    #[instrument(skip(adapters, sink), level = "info", fields(adapter_count = adapters.len()))]
    pub async fn start(
        adapters: Vec<Arc<dyn BleAdapter>>,
        sink: Arc<dyn NotificationSink>,
        config: ManagerConfig,
    ) -> Result<Self, DeviceError> {
        let adapters: Vec<RegisteredAdapter> = adapters
            .into_iter()
            .enumerate()
            .map(|(index, adapter)| RegisteredAdapter::new(AdapterId(index), adapter))
            .collect();
        let registry = Arc::new(DeviceRegistry::new());
        let discovery = Arc::new(DiscoveryCache::new(
            config.discovery_ttl(),
            config.disconnect_clear_policy(),
        ));
        let resolver = Arc::new(GattResolver::new(
            registry.clone(),
            config.operation_timeout(),
        ));

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let dispatcher = EventDispatcher::new(
            &adapters,
            registry.clone(),
            discovery.clone(),
            resolver.clone(),
            notify_tx,
        );
        let tasks = vec![
            tokio::spawn(dispatcher.run(dispatch_rx, cancel.clone())),
            tokio::spawn(run_notification_worker(sink, notify_rx, cancel.clone())),
        ];

        let manager = Self {
            inner: Arc::new(ManagerInner {
                adapters,
                registry,
                discovery,
                resolver,
                dispatch_tx,
                config,
                cancel,
                tasks: Mutex::new(tasks),
            }),
        };
        if let Err(error) = manager.start_adapters().await {
            manager.shutdown().await;
            return Err(error);
        }
        Ok(manager)
    }

    async fn start_adapters(&self) -> Result<(), DeviceError> {
        for registered in &self.inner.adapters {
            let events = EventSender::new(registered.id(), self.inner.dispatch_tx.clone());
            let adapter = registered.adapter();
            self.bounded(AdapterOperation::Start, adapter.start(events))
                .await?;

            match adapter.discovered_devices().await {
                Ok(devices) => {
                    for device in devices {
                        self.inner.discovery.put(registered, device);
                    }
                }
                Err(error) => {
                    warn!(adapter = adapter.name(), %error, "could not seed discovered devices");
                }
            }
            info!(adapter = adapter.name(), id = %registered.id(), "adapter started");
        }
        Ok(())
    }

    /// Returns the manager configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Returns the number of registered adapters.
    #[must_use]
    pub fn adapter_count(&self) -> usize {
        self.inner.adapters.len()
    }

    /// Lists devices seen within the discovery TTL.
    #[must_use]
    pub fn list_discovered(&self) -> Vec<Device> {
        self.inner.discovery.list_all()
    }

    /// Lists currently connected devices.
    #[must_use]
    pub fn list_connected(&self) -> Vec<Device> {
        self.inner.registry.devices()
    }

    /// Returns a connected device, falling back to the discovery cache.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceNotFound`] when the id is neither connected nor discovered.
    pub fn get_device(&self, device_id: &str) -> Result<Device, DeviceError> {
        if let Ok(proxied) = self.inner.registry.get(device_id) {
            return Ok(proxied.device().clone());
        }
        self.inner
            .discovery
            .get(device_id)
            .map(|proxied| proxied.device().clone())
            .ok_or_else(|| DeviceError::device_not_found(device_id))
    }

    /// Connects to a discovered device through the adapter that discovered it.
    ///
    /// Already-connected devices are returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceNotFound`] for unknown ids, or an adapter or
    /// timeout error when the connection attempt fails.
    #[instrument(skip(self), level = "info")]
    pub async fn connect(&self, device_id: &str) -> Result<Device, DeviceError> {
        if let Ok(proxied) = self.inner.registry.get(device_id) {
            debug!("device already connected");
            return Ok(proxied.device().clone());
        }
        let discovered = self
            .inner
            .discovery
            .get(device_id)
            .ok_or_else(|| DeviceError::device_not_found(device_id))?;

        let device = self
            .bounded(
                AdapterOperation::Connect,
                discovered.adapter().connect(device_id),
            )
            .await?;
        self.inner
            .registry
            .upsert_on_connect(discovered.registered_adapter(), device);
        self.inner.registry.get(device_id).map(|proxied| proxied.device().clone())
    }

    /// Disconnects a connected device and forgets its cached state.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceNotFound`] for unregistered ids and
    /// [`DeviceError::AdapterFailure`] when the adapter refuses; the device then
    /// stays registered.
    #[instrument(skip(self), level = "info")]
    pub async fn disconnect(&self, device_id: &str) -> Result<(), DeviceError> {
        let proxied = self.inner.registry.get(device_id)?;
        let disconnected = self
            .bounded(
                AdapterOperation::Disconnect,
                proxied.adapter().disconnect(device_id),
            )
            .await?;
        self.ensure(disconnected, AdapterOperation::Disconnect, device_id)?;
        self.forget(device_id);
        Ok(())
    }

    /// Removes the pairing for a connected device and forgets it.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceNotFound`] for unregistered ids, or an
    /// adapter error when unpairing fails or is unsupported.
    #[instrument(skip(self), level = "info")]
    pub async fn unpair(&self, device_id: &str) -> Result<(), DeviceError> {
        let proxied = self.inner.registry.get(device_id)?;
        let unpaired = self
            .bounded(AdapterOperation::Unpair, proxied.adapter().unpair(device_id))
            .await?;
        self.ensure(unpaired, AdapterOperation::Unpair, device_id)?;
        self.forget(device_id);
        Ok(())
    }

    /// Enumerates every GATT service on a connected device.
    ///
    /// This always asks the adapter; only individual resolutions are cached.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceNotFound`] for unregistered ids, or an
    /// adapter or timeout error.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_services(&self, device_id: &str) -> Result<Vec<GattService>, DeviceError> {
        let proxied = self.inner.registry.get(device_id)?;
        self.bounded(
            AdapterOperation::ListServices,
            proxied.adapter().gatt_services(device_id),
        )
        .await
    }

    /// Lists the characteristics of one resolved service.
    ///
    /// # Errors
    ///
    /// Returns resolution errors such as [`DeviceError::ServiceNotFound`].
    #[instrument(skip(self), level = "debug")]
    pub async fn list_characteristics(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<Vec<GattCharacteristic>, DeviceError> {
        let service = self
            .inner
            .resolver
            .resolve_service(device_id, service_uuid)
            .await?;
        Ok(service.service().characteristics().to_vec())
    }

    /// Reads a characteristic value.
    ///
    /// # Errors
    ///
    /// Returns resolution errors, [`DeviceError::ReadFailed`] when the adapter
    /// returns no value, or an adapter or timeout error.
    #[instrument(skip(self), level = "debug")]
    pub async fn read(
        &self,
        device_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<Vec<u8>, DeviceError> {
        let value = self
            .on_characteristic(
                AdapterOperation::Read,
                device_id,
                service_uuid,
                characteristic_uuid,
                |proxied, characteristic| async move {
                    proxied.adapter().read_characteristic(&characteristic).await
                },
            )
            .await?;
        value.ok_or_else(|| DeviceError::ReadFailed {
            device_id: device_id.to_string(),
            characteristic_uuid: normalise_uuid(characteristic_uuid),
        })
    }

    /// Writes a characteristic value.
    ///
    /// # Errors
    ///
    /// Returns resolution errors, [`DeviceError::AdapterFailure`] when the
    /// adapter reports a failed write, or an adapter or timeout error.
    #[instrument(skip(self, payload), level = "debug", fields(payload_len = payload.len()))]
    pub async fn write(
        &self,
        device_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
        payload: &[u8],
    ) -> Result<(), DeviceError> {
        let written = self
            .on_characteristic(
                AdapterOperation::Write,
                device_id,
                service_uuid,
                characteristic_uuid,
                move |proxied, characteristic| async move {
                    proxied
                        .adapter()
                        .write_characteristic(&characteristic, payload)
                        .await
                },
            )
            .await?;
        self.ensure(written, AdapterOperation::Write, device_id)
    }

    /// Asks the adapter to start emitting value changes for a characteristic.
    ///
    /// Value changes are then delivered to the manager's notification sink.
    ///
    /// # Errors
    ///
    /// Returns resolution errors, [`DeviceError::AdapterFailure`] when the
    /// adapter refuses, or an adapter or timeout error.
    #[instrument(skip(self), level = "debug")]
    pub async fn subscribe_notifications(
        &self,
        device_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<(), DeviceError> {
        let enabled = self
            .on_characteristic(
                AdapterOperation::EnableNotifications,
                device_id,
                service_uuid,
                characteristic_uuid,
                |proxied, characteristic| async move {
                    proxied.adapter().enable_notifications(&characteristic).await
                },
            )
            .await?;
        self.ensure(enabled, AdapterOperation::EnableNotifications, device_id)
    }

    /// Waits until every event emitted before this call has been dispatched.
    ///
    /// Returns immediately once the manager has shut down.
    pub async fn sync_events(&self) {
        let (done, acknowledged) = oneshot::channel();
        if self
            .inner
            .dispatch_tx
            .send(DispatchMessage::Barrier(done))
            .is_err()
        {
            return;
        }
        let _ = acknowledged.await;
    }

    /// Stops the dispatch loop and notification worker.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(error) = task.await {
                warn!(%error, "background task ended abnormally");
            }
        }
    }

    async fn resolve(
        &self,
        device_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<(ProxiedDevice, CharacteristicHandle), DeviceError> {
        let proxied = self.inner.registry.get(device_id)?;
        let characteristic = self
            .inner
            .resolver
            .resolve_characteristic(device_id, service_uuid, characteristic_uuid)
            .await?;
        Ok((proxied, characteristic))
    }

    /// Resolves a characteristic and runs `call` against its adapter.
    ///
    /// A session that ends between resolution and the radio call surfaces as
    /// `NotConnected` on a handle that is no longer live; that case resolves
    /// once more and retries.
    async fn on_characteristic<T, F, Fut>(
        &self,
        operation: AdapterOperation,
        device_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
        call: F,
    ) -> Result<T, DeviceError>
    where
        F: Fn(ProxiedDevice, CharacteristicHandle) -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let mut retried = false;
        loop {
            let (proxied, characteristic) = self
                .resolve(device_id, service_uuid, characteristic_uuid)
                .await?;
            let session = characteristic.session();
            match self
                .bounded(operation, call(proxied.clone(), characteristic))
                .await
            {
                Err(DeviceError::Adapter {
                    source: AdapterError::NotConnected { .. },
                    ..
                }) if !retried && !proxied.adapter().is_session_active(device_id, session) => {
                    debug!(%operation, device_id, "session ended mid-call, resolving again");
                    retried = true;
                }
                result => return result,
            }
        }
    }

    fn forget(&self, device_id: &str) {
        forget_device(
            &self.inner.registry,
            &self.inner.discovery,
            &self.inner.resolver,
            device_id,
        );
    }

    fn ensure(
        &self,
        succeeded: bool,
        operation: AdapterOperation,
        device_id: &str,
    ) -> Result<(), DeviceError> {
        if succeeded {
            Ok(())
        } else {
            Err(DeviceError::AdapterFailure {
                operation,
                device_id: device_id.to_string(),
            })
        }
    }

    async fn bounded<T>(
        &self,
        operation: AdapterOperation,
        call: impl Future<Output = Result<T, AdapterError>>,
    ) -> Result<T, DeviceError> {
        let timeout = self.operation_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(|source| DeviceError::Adapter { operation, source }),
            Err(_elapsed) => Err(DeviceError::OperationTimeout { operation, timeout }),
        }
    }

    fn operation_timeout(&self) -> Duration {
        self.inner.config.operation_timeout()
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("adapters", &self.inner.adapters.len())
            .field("connected", &self.inner.registry.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
