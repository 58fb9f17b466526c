use std::io;

use anyhow::Result;
use tokio::time::sleep;
use tracing::info;

use crate::cli::command::{OutputFormat, ScanArgs};
use crate::manager::DeviceManager;

use super::ui::{DevicesView, Painter};

/// Executes the `scan` command.
pub(crate) async fn run<W>(
    manager: &DeviceManager,
    args: &ScanArgs,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    sleep(args.duration()).await;
    manager.sync_events().await;
    let devices = manager.list_discovered();
    info!(count = devices.len(), "scan finished");

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&devices)?)?,
        OutputFormat::Pretty => writeln!(out, "{}", DevicesView::new(&devices, painter))?,
    }
    Ok(())
}
