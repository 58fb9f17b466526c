use std::fmt::{self, Display, Formatter};

use crate::utils::{format_hex, printable_text};

use super::painter::Painter;
use super::table::Table;

/// Renders the result of a characteristic read.
pub(crate) struct ReadView<'a> {
    device_id: &'a str,
    characteristic_uuid: &'a str,
    value: &'a [u8],
    painter: &'a Painter,
}

impl<'a> ReadView<'a> {
    pub(crate) fn new(
        device_id: &'a str,
        characteristic_uuid: &'a str,
        value: &'a [u8],
        painter: &'a Painter,
    ) -> Self {
        Self {
            device_id,
            characteristic_uuid,
            value,
            painter,
        }
    }
}

impl Display for ReadView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = match printable_text(self.value) {
            Some(text) => self.painter.value(text),
            None => self.painter.muted("<binary>"),
        };
        let table = Table::key_value(
            self.painter,
            vec![
                ("device_id", self.painter.identifier(self.device_id)),
                (
                    "characteristic",
                    self.painter.identifier(self.characteristic_uuid),
                ),
                ("hex", self.painter.value(format_hex(self.value))),
                ("text", text),
            ],
        );
        write!(f, "{table}")
    }
}

/// Renders the confirmation of a characteristic write.
pub(crate) struct WriteView<'a> {
    characteristic_uuid: &'a str,
    written: usize,
    painter: &'a Painter,
}

impl<'a> WriteView<'a> {
    pub(crate) fn new(characteristic_uuid: &'a str, written: usize, painter: &'a Painter) -> Self {
        Self {
            characteristic_uuid,
            written,
            painter,
        }
    }
}

impl Display for WriteView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.painter.success("✓"),
            self.painter.value(format!("wrote {} byte(s) to", self.written)),
            self.painter.identifier(self.characteristic_uuid)
        )
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn read_view_shows_hex_and_text() {
        let painter = Painter::new(false);
        let view = ReadView::new("AA:BB", "2a19", b"OK", &painter);
        assert_snapshot!(view.to_string(), @r"
        ╭────────────────┬───────╮
        │ field          │ value │
        ├────────────────┼───────┤
        │ device_id      │ AA:BB │
        │ characteristic │ 2a19  │
        │ hex            │ 4F 4B │
        │ text           │ OK    │
        ╰────────────────┴───────╯
        ");
    }

    #[test]
    fn write_view_counts_bytes() {
        let painter = Painter::new(false);
        let view = WriteView::new("ffe1", 3, &painter);
        assert_snapshot!(view.to_string(), @"✓ wrote 3 byte(s) to ffe1");
    }
}
