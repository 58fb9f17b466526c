mod app;
mod cli;
mod error;
mod hw;
mod manager;
mod notification;
mod settings;
mod telemetry;
mod terminal;
mod utils;

pub use app::{fake_adapters, real_adapters, run, run_with_clients};
pub use cli::{
    Args, CharacteristicArgs, Command, DeviceArgs, FakeArgs, ListenArgs, LogLevel, OutputFormat,
    ScanArgs, ServiceArgs, WriteArgs,
};
pub use error::{AdapterError, AdapterOperation, DeviceError, FixtureError, SettingsError};
pub use hw::{
    AdapterEvent, AdapterId, BleAdapter, BtleplugAdapter, CharacteristicHandle, ConnectionState,
    Device, EventSender, FakeAdapter, FakeCalls, GattCharacteristic, GattService, ServiceHandle,
    SessionId,
};
pub use manager::{
    CacheProvider, DEFAULT_DISCOVERY_TTL, DEFAULT_OPERATION_TIMEOUT, DeviceManager,
    DisconnectClearPolicy, ManagerConfig, MemoryCacheProvider,
};
pub use notification::{BroadcastSink, NotificationSink, ValueChangeEvent};
pub use settings::Settings;
pub use terminal::{SystemTerminalClient, TerminalClient};
