use std::fmt::{self, Display, Formatter};

use crate::cli::listen::ListenStopReason;
use crate::notification::ValueChangeEvent;
use crate::utils::{format_hex, printable_text};

use super::painter::Painter;
use super::table::Table;

/// Renders what a listen session is subscribed to.
pub(crate) struct ListenReadyView<'a> {
    device_id: &'a str,
    service_uuid: &'a str,
    characteristic_uuid: &'a str,
    painter: &'a Painter,
}

impl<'a> ListenReadyView<'a> {
    pub(crate) fn new(
        device_id: &'a str,
        service_uuid: &'a str,
        characteristic_uuid: &'a str,
        painter: &'a Painter,
    ) -> Self {
        Self {
            device_id,
            service_uuid,
            characteristic_uuid,
            painter,
        }
    }
}

impl Display for ListenReadyView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("device_id", self.painter.identifier(self.device_id)),
                ("service", self.painter.identifier(self.service_uuid)),
                (
                    "characteristic",
                    self.painter.identifier(self.characteristic_uuid),
                ),
            ],
        );
        write!(f, "{}", self.painter.heading("Listening for value changes:"))?;
        write!(f, "\n{table}")
    }
}

/// Renders a single value change line.
pub(crate) struct ValueChangeView<'a> {
    index: usize,
    event: &'a ValueChangeEvent,
    painter: &'a Painter,
}

impl<'a> ValueChangeView<'a> {
    pub(crate) fn new(index: usize, event: &'a ValueChangeEvent, painter: &'a Painter) -> Self {
        Self {
            index,
            event,
            painter,
        }
    }
}

impl Display for ValueChangeView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index_label = self.painter.muted(format!("[{:04}]", self.index));
        write!(
            f,
            "{index_label} {}",
            self.painter.value(format_hex(self.event.value()))
        )?;
        if let Some(text) = printable_text(self.event.value()) {
            write!(f, " {}", self.painter.muted(format!("text={text}")))?;
        }
        Ok(())
    }
}

/// Renders the listen session summary.
pub(crate) struct ListenSummaryView<'a> {
    received: usize,
    stop_reason: &'a ListenStopReason,
    painter: &'a Painter,
}

impl<'a> ListenSummaryView<'a> {
    pub(crate) fn new(
        received: usize,
        stop_reason: &'a ListenStopReason,
        painter: &'a Painter,
    ) -> Self {
        Self {
            received,
            stop_reason,
            painter,
        }
    }
}

impl Display for ListenSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stop_reason = match self.stop_reason {
            ListenStopReason::ReachedLimit(_) => self.painter.success(self.stop_reason.to_string()),
            ListenStopReason::Interrupted | ListenStopReason::StreamClosed => {
                self.painter.warning(self.stop_reason.to_string())
            }
        };
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            stop_reason,
            self.painter
                .value(format!("- received {} value change(s)", self.received))
        )
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::printable(b"21.5".to_vec(), "[0007] 32 31 2E 35 text=21.5")]
    #[case::binary(vec![0x05, 0x00], "[0007] 05 00")]
    fn value_change_line_shows_text_when_printable(#[case] value: Vec<u8>, #[case] expected: &str) {
        let painter = Painter::new(false);
        let event = ValueChangeEvent::new("AA:BB", "180f", "2a19", value);
        pretty_assertions::assert_eq!(expected, ValueChangeView::new(7, &event, &painter).to_string());
    }

    #[test]
    fn summary_reports_limit() {
        let painter = Painter::new(false);
        let reason = ListenStopReason::ReachedLimit(2);
        assert_snapshot!(
            ListenSummaryView::new(2, &reason, &painter).to_string(),
            @"Stopped: reached limit of 2 - received 2 value change(s)"
        );
    }
}
