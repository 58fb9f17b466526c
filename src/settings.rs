use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::debug;

use crate::error::SettingsError;
use crate::manager::{DisconnectClearPolicy, ManagerConfig};

const SETTINGS_FILE_NAME: &str = "settings.json";

/// Optional on-disk manager settings.
///
/// Durations are written in milliseconds:
///
/// ```json
/// { "discovery_ttl_ms": 5000, "operation_timeout_ms": 10000, "disconnect_clear_policy": "device" }
/// ```
#[serde_as]
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    discovery_ttl_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    operation_timeout_ms: Option<Duration>,
    disconnect_clear_policy: Option<DisconnectClearPolicy>,
}

/// Values given on the command line, which win over the settings file.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub(crate) struct ConfigOverrides {
    pub(crate) discovery_ttl: Option<Duration>,
    pub(crate) operation_timeout: Option<Duration>,
    pub(crate) disconnect_clear_policy: Option<DisconnectClearPolicy>,
}

impl Settings {
    /// Loads settings from an explicit path, or from the platform config
    /// directory when none is given. A missing default file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or is not valid JSON, or
    /// when an explicitly requested file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => {
                let path = default_settings_path();
                if path.exists() {
                    Self::load_from_path(&path)
                } else {
                    debug!(path = %path.display(), "no settings file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reads and parses a settings file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or is not valid JSON.
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub(crate) fn manager_config(&self, overrides: ConfigOverrides) -> ManagerConfig {
        let defaults = ManagerConfig::default();
        ManagerConfig::builder()
            .discovery_ttl(
                overrides
                    .discovery_ttl
                    .or(self.discovery_ttl_ms)
                    .unwrap_or(defaults.discovery_ttl()),
            )
            .operation_timeout(
                overrides
                    .operation_timeout
                    .or(self.operation_timeout_ms)
                    .unwrap_or(defaults.operation_timeout()),
            )
            .disconnect_clear_policy(
                overrides
                    .disconnect_clear_policy
                    .or(self.disconnect_clear_policy)
                    .unwrap_or(defaults.disconnect_clear_policy()),
            )
            .build()
    }
}

fn io_error(path: &Path, source: io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn default_settings_path() -> PathBuf {
    let Some(project_dirs) = ProjectDirs::from("io", "blehub", "blehub") else {
        return std::env::temp_dir().join("blehub").join(SETTINGS_FILE_NAME);
    };
    project_dirs.config_dir().join(SETTINGS_FILE_NAME)
}
