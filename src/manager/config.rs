use std::time::Duration;

use bon::Builder;
use serde::Deserialize;

pub const DEFAULT_DISCOVERY_TTL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// What the discovery cache forgets when any device disconnects.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize, clap::ValueEnum, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectClearPolicy {
    /// Drop every discovered device, forcing a full re-discovery.
    #[default]
    #[display("all")]
    #[value(name = "all")]
    #[serde(alias = "all")]
    ClearAll,
    /// Drop only the disconnected device's discovery entry.
    #[display("device")]
    #[value(name = "device")]
    #[serde(alias = "device")]
    DeviceOnly,
}

/// Tuning for a [`crate::DeviceManager`].
///
/// ```
/// use std::time::Duration;
///
/// let config = blehub::ManagerConfig::builder()
///     .operation_timeout(Duration::from_secs(2))
///     .disconnect_clear_policy(blehub::DisconnectClearPolicy::DeviceOnly)
///     .build();
/// assert_eq!(Duration::from_millis(5_000), config.discovery_ttl());
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Builder)]
pub struct ManagerConfig {
    #[builder(default = DEFAULT_DISCOVERY_TTL)]
    discovery_ttl: Duration,
    #[builder(default = DEFAULT_OPERATION_TIMEOUT)]
    operation_timeout: Duration,
    #[builder(default)]
    disconnect_clear_policy: DisconnectClearPolicy,
}

impl ManagerConfig {
    /// How long a discovered device stays listed after its last advertisement.
    #[must_use]
    pub fn discovery_ttl(&self) -> Duration {
        self.discovery_ttl
    }

    /// Deadline applied to every adapter radio call.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    #[must_use]
    pub fn disconnect_clear_policy(&self) -> DisconnectClearPolicy {
        self.disconnect_clear_policy
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
