use std::fmt::{self, Display, Formatter};

use crate::hw::{GattCharacteristic, GattService};
use crate::utils::or_dash;

use super::painter::Painter;
use super::table::Table;

fn characteristic_table(painter: &Painter, characteristics: &[GattCharacteristic]) -> Table {
    let rows = characteristics
        .iter()
        .map(|characteristic| {
            vec![
                painter.identifier(characteristic.uuid()),
                characteristic.properties().join(","),
                or_dash(characteristic.description()).to_string(),
            ]
        })
        .collect();
    Table::grid(["characteristic", "properties", "description"], rows)
        .with_empty_message(painter.muted("(no characteristics)"))
}

/// Renders every service of a device with its characteristics.
pub(crate) struct ServicesView<'a> {
    device_id: &'a str,
    services: &'a [GattService],
    painter: &'a Painter,
}

impl<'a> ServicesView<'a> {
    pub(crate) fn new(device_id: &'a str, services: &'a [GattService], painter: &'a Painter) -> Self {
        Self {
            device_id,
            services,
            painter,
        }
    }
}

impl Display for ServicesView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.painter.heading("GATT services of"),
            self.painter.identifier(self.device_id)
        )?;
        if self.services.is_empty() {
            return write!(f, "\n{}", self.painter.warning("No services exposed."));
        }
        for service in self.services {
            write!(
                f,
                "\n\n{} {}",
                self.painter.heading("Service"),
                self.painter.identifier(service.uuid())
            )?;
            write!(
                f,
                "\n{}",
                characteristic_table(self.painter, service.characteristics())
            )?;
        }
        Ok(())
    }
}

/// Renders the characteristics of a single service.
pub(crate) struct CharacteristicsView<'a> {
    service_uuid: &'a str,
    characteristics: &'a [GattCharacteristic],
    painter: &'a Painter,
}

impl<'a> CharacteristicsView<'a> {
    pub(crate) fn new(
        service_uuid: &'a str,
        characteristics: &'a [GattCharacteristic],
        painter: &'a Painter,
    ) -> Self {
        Self {
            service_uuid,
            characteristics,
            painter,
        }
    }
}

impl Display for CharacteristicsView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.painter.heading("Service"),
            self.painter.identifier(self.service_uuid)
        )?;
        write!(
            f,
            "\n{}",
            characteristic_table(self.painter, self.characteristics)
        )
    }
}
