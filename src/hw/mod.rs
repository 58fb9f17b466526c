mod adapter;
mod btleplug_backend;
mod fake_backend;
mod model;

pub use self::adapter::{AdapterEvent, AdapterId, BleAdapter, EventSender};
pub(crate) use self::adapter::DispatchMessage;
pub use self::btleplug_backend::BtleplugAdapter;
pub use self::fake_backend::{FakeAdapter, FakeCalls};
pub(crate) use self::fake_backend::{HexPayload, NotificationPayloads, ScanFixture};
pub use self::model::{
    CharacteristicHandle, ConnectionState, Device, GattCharacteristic, GattService,
    ServiceHandle, SessionId,
};
pub(crate) use self::model::normalise_uuid;
