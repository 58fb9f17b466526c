use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use super::cache::{CacheProvider, MemoryCacheProvider};
use super::config::DisconnectClearPolicy;
use super::registry::{ProxiedDevice, RegisteredAdapter};
use crate::hw::{ConnectionState, Device};

const DISCOVERED_DEVICE_PREFIX: &str = "discovered-device:";

/// Time-bounded store of advertised devices that are not connected.
pub(crate) struct DiscoveryCache {
    provider: Arc<dyn CacheProvider<ProxiedDevice>>,
    ttl: Duration,
    clear_policy: DisconnectClearPolicy,
}

impl DiscoveryCache {
    pub(crate) fn new(ttl: Duration, clear_policy: DisconnectClearPolicy) -> Self {
        Self::with_provider(Arc::new(MemoryCacheProvider::new()), ttl, clear_policy)
    }

    pub(crate) fn with_provider(
        provider: Arc<dyn CacheProvider<ProxiedDevice>>,
        ttl: Duration,
        clear_policy: DisconnectClearPolicy,
    ) -> Self {
        Self {
            provider,
            ttl,
            clear_policy,
        }
    }

    /// Inserts or refreshes a device with a fresh expiry.
    #[instrument(skip(self, adapter, device), level = "trace", fields(device_id = device.id()))]
    pub(crate) fn put(&self, adapter: &RegisteredAdapter, device: Device) {
        let proxied = ProxiedDevice::new(
            device.with_state(ConnectionState::Discovered),
            adapter.clone(),
        );
        self.provider.set(&key_for(proxied.id()), proxied, self.ttl);
    }

    /// Returns a snapshot of every unexpired device, ordered by id.
    pub(crate) fn list_all(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .provider
            .get_by_prefix(DISCOVERED_DEVICE_PREFIX)
            .into_values()
            .map(|proxied| proxied.device().clone())
            .collect();
        devices.sort_by(|left, right| left.id().cmp(right.id()));
        devices
    }

    /// Looks up one unexpired device together with the adapter that saw it.
    pub(crate) fn get(&self, device_id: &str) -> Option<ProxiedDevice> {
        let key = key_for(device_id);
        self.provider.get_by_prefix(&key).remove(&key)
    }

    pub(crate) fn clear(&self) {
        self.provider.remove_by_prefix(DISCOVERED_DEVICE_PREFIX);
    }

    /// Applies the configured disconnect policy.
    pub(crate) fn forget_on_disconnect(&self, device_id: &str) {
        match self.clear_policy {
            DisconnectClearPolicy::ClearAll => {
                debug!(device_id, "clearing discovery cache after disconnect");
                self.clear();
            }
            DisconnectClearPolicy::DeviceOnly => {
                self.provider.remove(&key_for(device_id));
            }
        }
    }
}

fn key_for(device_id: &str) -> String {
    format!("{DISCOVERED_DEVICE_PREFIX}{device_id}")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::hw::{AdapterId, FakeAdapter};

    const TTL: Duration = Duration::from_millis(5_000);

    fn adapter() -> RegisteredAdapter {
        RegisteredAdapter::new(AdapterId(0), Arc::new(FakeAdapter::builder().build()))
    }

    fn ids(cache: &DiscoveryCache) -> Vec<String> {
        cache
            .list_all()
            .iter()
            .map(|device| device.id().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn device_expires_exactly_at_ttl() {
        let cache = DiscoveryCache::new(TTL, DisconnectClearPolicy::ClearAll);
        cache.put(&adapter(), Device::new("AA:BB", Some("Sensor1".into())));

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(vec!["AA:BB"], ids(&cache));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(ids(&cache).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rediscovery_extends_lifetime() {
        let cache = DiscoveryCache::new(TTL, DisconnectClearPolicy::ClearAll);
        cache.put(&adapter(), Device::new("AA:BB", None));
        tokio::time::advance(Duration::from_millis(4_000)).await;
        cache.put(&adapter(), Device::new("AA:BB", None));
        tokio::time::advance(Duration::from_millis(4_000)).await;

        assert_eq!(vec!["AA:BB"], ids(&cache));
    }

    #[rstest]
    #[case(DisconnectClearPolicy::ClearAll, vec![])]
    #[case(DisconnectClearPolicy::DeviceOnly, vec!["AA:BB:CC"])]
    #[tokio::test]
    async fn disconnect_policy_controls_what_is_forgotten(
        #[case] policy: DisconnectClearPolicy,
        #[case] expected: Vec<&str>,
    ) {
        let cache = DiscoveryCache::new(TTL, policy);
        cache.put(&adapter(), Device::new("AA:BB", None));
        cache.put(&adapter(), Device::new("AA:BB:CC", None));

        cache.forget_on_disconnect("AA:BB");

        assert_eq!(expected, ids(&cache));
    }

    #[tokio::test]
    async fn get_returns_owning_adapter() {
        let cache = DiscoveryCache::new(TTL, DisconnectClearPolicy::ClearAll);
        cache.put(&adapter(), Device::new("AA:BB", None));

        let proxied = cache.get("AA:BB").expect("device should be cached");
        assert_eq!(AdapterId(0), proxied.adapter_id());
        assert_eq!(ConnectionState::Discovered, proxied.device().state());
        assert!(cache.get("AA:B").is_none());
    }
}
