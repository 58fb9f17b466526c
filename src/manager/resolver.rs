use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};

use super::registry::{DeviceRegistry, ProxiedDevice};
use crate::error::{AdapterError, AdapterOperation, DeviceError};
use crate::hw::{BleAdapter, CharacteristicHandle, ServiceHandle, SessionId, normalise_uuid};

/// Resolved handles for a single device.
#[derive(Debug, Default)]
struct DeviceGattCache {
    services: HashMap<String, ServiceHandle>,
    characteristics: HashMap<(String, String), CharacteristicHandle>,
}

/// Outcome of consulting the cache before going to the adapter.
enum Lookup<T> {
    Live(T),
    StaleSession,
    Missing,
}

fn lookup<T: Clone>(
    cached: Option<&T>,
    session_of: impl Fn(&T) -> SessionId,
    adapter: &dyn BleAdapter,
    device_id: &str,
) -> Lookup<T> {
    match cached {
        Some(handle) if adapter.is_session_active(device_id, session_of(handle)) => {
            Lookup::Live(handle.clone())
        }
        Some(_stale) => Lookup::StaleSession,
        None => Lookup::Missing,
    }
}

/// Caches service and characteristic resolution per device.
///
/// Each device has its own async lock, held across the adapter call so that
/// concurrent resolves of the same device share a single lookup, while
/// distinct devices never contend.
pub(crate) struct GattResolver {
    registry: Arc<DeviceRegistry>,
    caches: Mutex<HashMap<String, Arc<tokio::sync::Mutex<DeviceGattCache>>>>,
    timeout: Duration,
}

impl GattResolver {
    pub(crate) fn new(registry: Arc<DeviceRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            caches: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Resolves a service on a registered device, reusing a live cached handle.
    #[instrument(skip(self), level = "debug")]
    pub(crate) async fn resolve_service(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<ServiceHandle, DeviceError> {
        let service_uuid = normalise_uuid(service_uuid);
        let (proxied, cache) = self.registered_cache(device_id)?;
        let mut cache = cache.lock().await;
        self.service_locked(&proxied, &mut cache, &service_uuid)
            .await
    }

    /// Resolves a characteristic under its (possibly cached) service.
    #[instrument(skip(self), level = "debug")]
    pub(crate) async fn resolve_characteristic(
        &self,
        device_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<CharacteristicHandle, DeviceError> {
        let service_uuid = normalise_uuid(service_uuid);
        let characteristic_uuid = normalise_uuid(characteristic_uuid);
        let key = (service_uuid.clone(), characteristic_uuid.clone());

        let (proxied, cache) = self.registered_cache(device_id)?;
        let adapter = proxied.adapter();
        let mut cache = cache.lock().await;
        match lookup(
            cache.characteristics.get(&key),
            CharacteristicHandle::session,
            adapter,
            device_id,
        ) {
            Lookup::Live(handle) => {
                trace!("characteristic cache hit");
                return Ok(handle);
            }
            Lookup::StaleSession => {
                debug!("cached characteristic belongs to an inactive session");
                cache.characteristics.remove(&key);
            }
            Lookup::Missing => {}
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let service = self.service_locked(&proxied, &mut cache, &service_uuid).await?;
            let resolved = self
                .bounded(
                    AdapterOperation::ResolveCharacteristic,
                    adapter.resolve_characteristic(&service, &characteristic_uuid),
                )
                .await?;
            let Some(handle) = resolved else {
                return Err(DeviceError::CharacteristicNotFound {
                    device_id: device_id.to_string(),
                    service_uuid,
                    characteristic_uuid,
                });
            };

            if adapter.is_session_active(device_id, handle.session()) {
                cache.characteristics.insert(key, handle.clone());
                return Ok(handle);
            }
            if attempts > 1 {
                return Err(stale_after_retry(device_id, AdapterOperation::ResolveCharacteristic));
            }
            debug!("freshly resolved characteristic is already stale, retrying once");
            cache.services.remove(&service_uuid);
        }
    }

    /// Drops every cached handle for a device.
    ///
    /// The device's cache is detached from the map first, so a resolve that is
    /// still in flight finishes against a cache nobody can reach again.
    pub(crate) fn invalidate(&self, device_id: &str) {
        let Some(detached) = self.caches.lock().remove(device_id) else {
            return;
        };
        match detached.try_lock() {
            Ok(mut cache) => {
                let dropped = cache.services.len() + cache.characteristics.len();
                cache.services.clear();
                cache.characteristics.clear();
                debug!(device_id, dropped, "invalidated cached GATT handles");
            }
            Err(_in_flight) => {
                warn!(device_id, "GATT cache busy during invalidation, leaving it detached");
            }
        }
    }

    async fn service_locked(
        &self,
        proxied: &ProxiedDevice,
        cache: &mut DeviceGattCache,
        service_uuid: &str,
    ) -> Result<ServiceHandle, DeviceError> {
        let device_id = proxied.id();
        let adapter = proxied.adapter();
        match lookup(
            cache.services.get(service_uuid),
            ServiceHandle::session,
            adapter,
            device_id,
        ) {
            Lookup::Live(handle) => {
                trace!(service_uuid, "service cache hit");
                return Ok(handle);
            }
            Lookup::StaleSession => {
                debug!(service_uuid, "cached service belongs to an inactive session");
                cache.services.remove(service_uuid);
                cache
                    .characteristics
                    .retain(|(service, _characteristic), _handle| service != service_uuid);
            }
            Lookup::Missing => {}
        }

        for attempt in 1..=2 {
            let resolved = self
                .bounded(
                    AdapterOperation::ResolveService,
                    adapter.resolve_service(device_id, service_uuid),
                )
                .await?;
            let Some(handle) = resolved else {
                return Err(DeviceError::ServiceNotFound {
                    device_id: device_id.to_string(),
                    service_uuid: service_uuid.to_string(),
                });
            };
            if adapter.is_session_active(device_id, handle.session()) {
                cache.services.insert(service_uuid.to_string(), handle.clone());
                return Ok(handle);
            }
            debug!(attempt, service_uuid, "freshly resolved service is already stale");
        }

        Err(stale_after_retry(device_id, AdapterOperation::ResolveService))
    }

    /// Checks registration while holding the map lock. A device forgotten
    /// after this point has its entry dropped by the following `invalidate`.
    fn registered_cache(
        &self,
        device_id: &str,
    ) -> Result<(ProxiedDevice, Arc<tokio::sync::Mutex<DeviceGattCache>>), DeviceError> {
        let mut caches = self.caches.lock();
        let proxied = self.registry.get(device_id)?;
        let cache = caches.entry(device_id.to_string()).or_default().clone();
        Ok((proxied, cache))
    }

    async fn bounded<T>(
        &self,
        operation: AdapterOperation,
        call: impl Future<Output = Result<T, AdapterError>>,
    ) -> Result<T, DeviceError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|source| DeviceError::Adapter { operation, source }),
            Err(_elapsed) => Err(DeviceError::OperationTimeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}

fn stale_after_retry(device_id: &str, operation: AdapterOperation) -> DeviceError {
    DeviceError::AdapterFailure {
        operation,
        device_id: device_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::{AdapterId, Device, FakeAdapter};
    use crate::manager::registry::RegisteredAdapter;

    const SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
    const CHARACTERISTIC: &str = "00002a19-0000-1000-8000-00805f9b34fb";

    fn connected_fixture() -> (Arc<FakeAdapter>, GattResolver) {
        let fake = Arc::new(FakeAdapter::builder().build());
        fake.add_connected_device(Device::new("AA:BB", None));
        let registry = Arc::new(DeviceRegistry::new());
        registry.upsert_on_connect(
            &RegisteredAdapter::new(AdapterId(0), fake.clone()),
            Device::new("AA:BB", None),
        );
        let resolver = GattResolver::new(registry, Duration::from_secs(1));
        (fake, resolver)
    }

    #[tokio::test]
    async fn second_characteristic_resolution_is_served_from_cache() {
        let (fake, resolver) = connected_fixture();

        let first = resolver
            .resolve_characteristic("AA:BB", SERVICE, CHARACTERISTIC)
            .await
            .expect("first resolution should succeed");
        let second = resolver
            .resolve_characteristic("AA:BB", SERVICE, CHARACTERISTIC)
            .await
            .expect("second resolution should succeed");

        assert_eq!(first, second);
        assert_eq!(1, fake.calls().resolve_characteristic);
        assert_eq!(1, fake.calls().resolve_service);
    }

    #[tokio::test]
    async fn uuid_case_does_not_split_the_cache() {
        let (fake, resolver) = connected_fixture();

        resolver
            .resolve_service("AA:BB", SERVICE)
            .await
            .expect("lowercase resolution should succeed");
        resolver
            .resolve_service("AA:BB", &SERVICE.to_ascii_uppercase())
            .await
            .expect("uppercase resolution should succeed");

        assert_eq!(1, fake.calls().resolve_service);
    }

    #[tokio::test]
    async fn stale_session_triggers_fresh_resolution() {
        let (fake, resolver) = connected_fixture();
        resolver
            .resolve_characteristic("AA:BB", SERVICE, CHARACTERISTIC)
            .await
            .expect("initial resolution should succeed");

        fake.expire_session("AA:BB");
        let refreshed = resolver
            .resolve_characteristic("AA:BB", SERVICE, CHARACTERISTIC)
            .await
            .expect("stale handle should be re-resolved");

        assert_eq!(2, fake.calls().resolve_characteristic);
        assert_eq!(2, fake.calls().resolve_service);
        assert!(fake.is_session_active("AA:BB", refreshed.session()));
    }

    #[tokio::test]
    async fn invalidate_forces_cache_miss() {
        let (fake, resolver) = connected_fixture();
        resolver
            .resolve_service("AA:BB", SERVICE)
            .await
            .expect("initial resolution should succeed");

        resolver.invalidate("AA:BB");
        resolver
            .resolve_service("AA:BB", SERVICE)
            .await
            .expect("resolution after invalidation should succeed");

        assert_eq!(2, fake.calls().resolve_service);
    }

    #[tokio::test]
    async fn unknown_service_and_characteristic_are_typed_errors() {
        let (_fake, resolver) = connected_fixture();

        let service = resolver.resolve_service("AA:BB", "dead").await;
        assert_matches!(service, Err(DeviceError::ServiceNotFound { service_uuid, .. }) if service_uuid == "dead");

        let characteristic = resolver
            .resolve_characteristic("AA:BB", SERVICE, "beef")
            .await;
        assert_matches!(
            characteristic,
            Err(DeviceError::CharacteristicNotFound { characteristic_uuid, .. })
            if characteristic_uuid == "beef"
        );
    }

    #[tokio::test]
    async fn unregistered_device_never_reaches_adapter() {
        let (fake, resolver) = connected_fixture();

        let result = resolver.resolve_service("CC:DD", SERVICE).await;

        assert_matches!(result, Err(DeviceError::DeviceNotFound { .. }));
        assert_eq!(0, fake.calls().resolve_service);
    }

    #[tokio::test]
    async fn forgotten_device_leaves_no_cache_entry() {
        let (_fake, resolver) = connected_fixture();
        resolver
            .resolve_characteristic("AA:BB", SERVICE, CHARACTERISTIC)
            .await
            .expect("initial resolution should succeed");

        resolver.registry.remove("AA:BB");
        resolver.invalidate("AA:BB");
        let service = resolver.resolve_service("AA:BB", SERVICE).await;
        let characteristic = resolver
            .resolve_characteristic("AA:BB", SERVICE, CHARACTERISTIC)
            .await;

        assert_matches!(service, Err(DeviceError::DeviceNotFound { .. }));
        assert_matches!(characteristic, Err(DeviceError::DeviceNotFound { .. }));
        assert!(resolver.caches.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_adapter_surfaces_operation_timeout() {
        let fake = Arc::new(
            FakeAdapter::builder()
                .latency(Duration::from_secs(5))
                .build(),
        );
        fake.add_connected_device(Device::new("AA:BB", None));
        let registry = Arc::new(DeviceRegistry::new());
        registry.upsert_on_connect(
            &RegisteredAdapter::new(AdapterId(0), fake.clone()),
            Device::new("AA:BB", None),
        );
        let resolver = GattResolver::new(registry, Duration::from_secs(1));

        let result = resolver.resolve_service("AA:BB", SERVICE).await;

        assert_matches!(
            result,
            Err(DeviceError::OperationTimeout { operation: AdapterOperation::ResolveService, .. })
        );
    }
}
