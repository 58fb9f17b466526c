use std::fmt::{self, Display, Formatter};

use crate::hw::{ConnectionState, Device};
use crate::utils::or_dash;

use super::painter::Painter;
use super::table::Table;

/// Renders a device list as a grid.
pub(crate) struct DevicesView<'a> {
    devices: &'a [Device],
    painter: &'a Painter,
}

impl<'a> DevicesView<'a> {
    pub(crate) fn new(devices: &'a [Device], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }

    fn state(&self, state: ConnectionState) -> String {
        match state {
            ConnectionState::Connected => self.painter.success(state.to_string()),
            ConnectionState::Discovered => self.painter.muted(state.to_string()),
        }
    }
}

impl Display for DevicesView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rows = self
            .devices
            .iter()
            .map(|device| {
                vec![
                    or_dash(device.adapter_name()).to_string(),
                    self.painter.identifier(device.id()),
                    self.painter.value(or_dash(device.name())),
                    self.state(device.state()),
                ]
            })
            .collect();
        let table = Table::grid(["adapter", "device_id", "name", "state"], rows)
            .with_empty_message(self.painter.warning("No devices discovered."));

        write!(f, "{}", self.painter.heading("Devices:"))?;
        write!(f, "\n{table}")
    }
}
