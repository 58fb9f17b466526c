mod cache;
mod config;
mod device_manager;
mod discovery;
mod dispatcher;
mod registry;
mod resolver;

pub use self::cache::{CacheProvider, MemoryCacheProvider};
pub use self::config::{
    DEFAULT_DISCOVERY_TTL, DEFAULT_OPERATION_TIMEOUT, DisconnectClearPolicy, ManagerConfig,
};
pub use self::device_manager::DeviceManager;
