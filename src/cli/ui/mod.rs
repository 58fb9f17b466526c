mod device_view;
mod gatt_view;
mod listen_view;
mod painter;
mod table;
mod value_view;

pub(crate) use self::device_view::DevicesView;
pub(crate) use self::gatt_view::{CharacteristicsView, ServicesView};
pub(crate) use self::listen_view::{ListenReadyView, ListenSummaryView, ValueChangeView};
pub(crate) use self::painter::Painter;
pub(crate) use self::value_view::{ReadView, WriteView};
