use std::io;

use anyhow::Result;
use derive_more::Display;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};

use crate::cli::command::{ListenArgs, OutputFormat};
use crate::cli::session::{connect_target, release_target};
use crate::hw::normalise_uuid;
use crate::manager::DeviceManager;
use crate::notification::{BroadcastSink, ValueChangeEvent};

use super::ui::{ListenReadyView, ListenSummaryView, Painter, ValueChangeView};

/// Why a listen session ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[serde(tag = "reason", content = "limit", rename_all = "snake_case")]
pub(crate) enum ListenStopReason {
    #[display("reached limit of {_0}")]
    ReachedLimit(usize),
    #[display("interrupted")]
    Interrupted,
    #[display("stream closed")]
    StreamClosed,
}

#[derive(Debug, Serialize)]
struct ListenSummaryOutput {
    received: usize,
    stopped: ListenStopReason,
}

/// Executes the `listen` command.
pub(crate) async fn run<W>(
    manager: &DeviceManager,
    sink: &BroadcastSink,
    args: &ListenArgs,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let target = args.characteristic();
    let device = connect_target(manager, target.target()).await?;
    // Subscribe to the sink first so values emitted while enabling are kept.
    let mut stream = sink.subscribe();
    if let Err(error) = manager
        .subscribe_notifications(device.id(), target.service(), target.characteristic())
        .await
    {
        release_target(manager, device.id()).await;
        return Err(error.into());
    }

    if format == OutputFormat::Pretty {
        writeln!(
            out,
            "{}",
            ListenReadyView::new(device.id(), target.service(), target.characteristic(), painter)
        )?;
    }

    let characteristic_uuid = normalise_uuid(target.characteristic());
    let is_wanted = |event: &ValueChangeEvent| {
        event.device_id() == device.id() && event.characteristic_uuid() == characteristic_uuid
    };

    let mut received = 0_usize;
    let mut write_result = Ok(());
    let stop_reason = loop {
        if let Some(limit) = args.max_notifications().filter(|limit| received >= *limit) {
            break ListenStopReason::ReachedLimit(limit);
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break ListenStopReason::Interrupted,
            next = stream.next() => match next {
                None => break ListenStopReason::StreamClosed,
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "listener fell behind, value changes were dropped");
                }
                Some(Ok(event)) if is_wanted(&event) => {
                    received += 1;
                    write_result = write_event(out, received, &event, format, painter);
                    if write_result.is_err() {
                        break ListenStopReason::StreamClosed;
                    }
                }
                Some(Ok(_other)) => {}
            },
        }
    };

    release_target(manager, device.id()).await;
    write_result?;
    info!(received, %stop_reason, "listen finished");

    match format {
        OutputFormat::Json => {
            let summary = ListenSummaryOutput {
                received,
                stopped: stop_reason,
            };
            writeln!(out, "{}", serde_json::to_string(&summary)?)?;
        }
        OutputFormat::Pretty => {
            writeln!(out)?;
            writeln!(
                out,
                "{}",
                ListenSummaryView::new(received, &stop_reason, painter)
            )?;
        }
    }
    Ok(())
}

fn write_event<W>(
    out: &mut W,
    index: usize,
    event: &ValueChangeEvent,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(event)?)?,
        OutputFormat::Pretty => writeln!(out, "{}", ValueChangeView::new(index, event, painter))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ListenStopReason::ReachedLimit(2), "reached limit of 2")]
    #[case(ListenStopReason::Interrupted, "interrupted")]
    #[case(ListenStopReason::StreamClosed, "stream closed")]
    fn stop_reason_reads_naturally(#[case] reason: ListenStopReason, #[case] expected: &str) {
        assert_eq!(expected, reason.to_string());
    }

    #[test]
    fn limit_stop_serialises_with_its_limit() {
        let summary = ListenSummaryOutput {
            received: 2,
            stopped: ListenStopReason::ReachedLimit(2),
        };
        assert_eq!(
            serde_json::json!({ "received": 2, "stopped": { "reason": "reached_limit", "limit": 2 } }),
            serde_json::to_value(summary).expect("summary should serialise")
        );
    }
}
