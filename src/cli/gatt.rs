use std::io;

use anyhow::Result;

use crate::cli::command::{DeviceArgs, OutputFormat, ServiceArgs};
use crate::cli::session::{connect_target, release_target};
use crate::manager::DeviceManager;

use super::ui::{CharacteristicsView, Painter, ServicesView};

/// Executes the `services` command.
pub(crate) async fn run_services<W>(
    manager: &DeviceManager,
    args: &DeviceArgs,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let device = connect_target(manager, args).await?;
    let services = manager.list_services(device.id()).await;
    release_target(manager, device.id()).await;
    let services = services?;

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&services)?)?,
        OutputFormat::Pretty => {
            writeln!(out, "{}", ServicesView::new(device.id(), &services, painter))?;
        }
    }
    Ok(())
}

/// Executes the `characteristics` command.
pub(crate) async fn run_characteristics<W>(
    manager: &DeviceManager,
    args: &ServiceArgs,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let device = connect_target(manager, args.target()).await?;
    let characteristics = manager
        .list_characteristics(device.id(), args.service())
        .await;
    release_target(manager, device.id()).await;
    let characteristics = characteristics?;

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&characteristics)?)?,
        OutputFormat::Pretty => writeln!(
            out,
            "{}",
            CharacteristicsView::new(args.service(), &characteristics, painter)
        )?,
    }
    Ok(())
}
