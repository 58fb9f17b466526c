use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Key/value store with per-entry expiry, consumed by the discovery cache.
pub trait CacheProvider<V>: Send + Sync {
    /// Inserts or replaces an entry that expires `ttl` from now.
    fn set(&self, key: &str, value: V, ttl: Duration);

    /// Returns every live entry whose key starts with `prefix`.
    fn get_by_prefix(&self, prefix: &str) -> HashMap<String, V>;

    /// Removes a single entry.
    fn remove(&self, key: &str);

    /// Removes every entry whose key starts with `prefix`.
    fn remove_by_prefix(&self, prefix: &str);
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// In-process [`CacheProvider`] evaluating expiry lazily at read time.
///
/// Expired entries are also purged whenever a new entry is written, which keeps
/// the map bounded without a background sweep.
#[derive(Debug)]
pub struct MemoryCacheProvider<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> MemoryCacheProvider<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryCacheProvider<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheProvider<V> for MemoryCacheProvider<V>
where
    V: Clone + Send,
{
    fn set(&self, key: &str, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_key, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    fn get_by_prefix(&self, prefix: &str) -> HashMap<String, V> {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.expires_at > now)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn remove_by_prefix(&self, prefix: &str) {
        self.entries.lock().retain(|key, _entry| !key.starts_with(prefix));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const TTL: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let cache = MemoryCacheProvider::new();
        cache.set("device-a", 1, TTL);

        tokio::time::advance(Duration::from_millis(99)).await;
        assert_eq!(1, cache.get_by_prefix("device-").len());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get_by_prefix("device-").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn set_refreshes_expiry() {
        let cache = MemoryCacheProvider::new();
        cache.set("device-a", 1, TTL);
        tokio::time::advance(Duration::from_millis(80)).await;
        cache.set("device-a", 2, TTL);
        tokio::time::advance(Duration::from_millis(80)).await;

        let live = cache.get_by_prefix("device-");
        assert_eq!(Some(&2), live.get("device-a"));
    }

    #[tokio::test]
    async fn prefix_queries_and_removal_only_touch_matching_keys() {
        let cache = MemoryCacheProvider::new();
        cache.set("device-a", 1, TTL);
        cache.set("device-b", 2, TTL);
        cache.set("other-c", 3, TTL);

        cache.remove_by_prefix("device-");

        assert!(cache.get_by_prefix("device-").is_empty());
        assert_eq!(1, cache.get_by_prefix("other-").len());
    }

    #[tokio::test]
    async fn remove_drops_exact_key_only() {
        let cache = MemoryCacheProvider::new();
        cache.set("device-AA:B", 1, TTL);
        cache.set("device-AA:BB", 2, TTL);

        cache.remove("device-AA:B");

        let live = cache.get_by_prefix("device-");
        assert_eq!(vec!["device-AA:BB"], live.keys().map(String::as_str).collect::<Vec<_>>());
    }
}
