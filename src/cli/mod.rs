pub(crate) mod command;
pub(crate) mod gatt;
pub(crate) mod io;
pub(crate) mod listen;
pub(crate) mod scan;
pub(crate) mod session;
pub(crate) mod ui;

pub use self::command::{
    Args, CharacteristicArgs, Command, DeviceArgs, FakeArgs, ListenArgs, LogLevel, OutputFormat,
    ScanArgs, ServiceArgs, WriteArgs,
};
