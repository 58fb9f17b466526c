use std::time::Duration;

use thiserror::Error;

/// Adapter calls that the device manager bounds with a timeout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum AdapterOperation {
    #[display("start")]
    Start,
    #[display("connect")]
    Connect,
    #[display("list_services")]
    ListServices,
    #[display("resolve_service")]
    ResolveService,
    #[display("resolve_characteristic")]
    ResolveCharacteristic,
    #[display("read")]
    Read,
    #[display("write")]
    Write,
    #[display("enable_notifications")]
    EnableNotifications,
    #[display("disconnect")]
    Disconnect,
    #[display("unpair")]
    Unpair,
}

/// Errors raised by an adapter backend while talking to its BLE stack.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("peripheral `{device_id}` is not known to adapter `{adapter}`")]
    UnknownPeripheral { adapter: String, device_id: String },
    #[error("peripheral `{device_id}` has no active session")]
    NotConnected { device_id: String },
    #[error("adapter `{adapter}` does not support `{operation}`")]
    Unsupported {
        adapter: String,
        operation: AdapterOperation,
    },
    #[error("adapter `{adapter}` is not available")]
    Unavailable { adapter: String },
    #[error("the event dispatcher is no longer running")]
    EventChannelClosed,
}

/// Errors returned by device manager operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device `{device_id}` is not registered")]
    DeviceNotFound { device_id: String },
    #[error("service `{service_uuid}` was not found on device `{device_id}`")]
    ServiceNotFound {
        device_id: String,
        service_uuid: String,
    },
    #[error(
        "characteristic `{characteristic_uuid}` was not found in service `{service_uuid}` on device `{device_id}`"
    )]
    CharacteristicNotFound {
        device_id: String,
        service_uuid: String,
        characteristic_uuid: String,
    },
    #[error("adapter `{operation}` call did not complete within {}", humantime::format_duration(*timeout))]
    OperationTimeout {
        operation: AdapterOperation,
        timeout: Duration,
    },
    #[error("adapter reported a failed `{operation}` for device `{device_id}`")]
    AdapterFailure {
        operation: AdapterOperation,
        device_id: String,
    },
    #[error("adapter returned no value reading `{characteristic_uuid}` on device `{device_id}`")]
    ReadFailed {
        device_id: String,
        characteristic_uuid: String,
    },
    #[error("adapter `{operation}` call failed")]
    Adapter {
        operation: AdapterOperation,
        source: AdapterError,
    },
}

impl DeviceError {
    pub(crate) fn device_not_found(device_id: &str) -> Self {
        Self::DeviceNotFound {
            device_id: device_id.to_string(),
        }
    }
}

/// Errors returned when parsing fake adapter fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("invalid hex payload `{value}`")]
    InvalidHex {
        value: String,
        source: hex::FromHexError,
    },
}

/// Errors returned while loading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file `{path}`")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("settings file `{path}` is not valid JSON")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
    #[error("device `{device_id}` was not discovered within {}", humantime::format_duration(*waited))]
    DeviceNotDiscovered { device_id: String, waited: Duration },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
