use std::io;

use anyhow::Result;
use serde::Serialize;
use serde_with::serde_as;

use crate::cli::command::{CharacteristicArgs, OutputFormat, WriteArgs};
use crate::cli::session::{connect_target, release_target};
use crate::manager::DeviceManager;
use crate::utils::printable_text;

use super::ui::{Painter, ReadView, WriteView};

#[serde_as]
#[derive(Debug, Serialize)]
struct ReadOutput<'a> {
    device_id: &'a str,
    service_uuid: &'a str,
    characteristic_uuid: &'a str,
    #[serde_as(as = "serde_with::hex::Hex")]
    value: &'a [u8],
    text: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WriteOutput<'a> {
    device_id: &'a str,
    service_uuid: &'a str,
    characteristic_uuid: &'a str,
    written: usize,
}

/// Executes the `read` command.
pub(crate) async fn run_read<W>(
    manager: &DeviceManager,
    args: &CharacteristicArgs,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let device = connect_target(manager, args.target()).await?;
    let value = manager
        .read(device.id(), args.service(), args.characteristic())
        .await;
    release_target(manager, device.id()).await;
    let value = value?;

    match format {
        OutputFormat::Json => {
            let output = ReadOutput {
                device_id: device.id(),
                service_uuid: args.service(),
                characteristic_uuid: args.characteristic(),
                value: &value,
                text: printable_text(&value),
            };
            writeln!(out, "{}", serde_json::to_string(&output)?)?;
        }
        OutputFormat::Pretty => writeln!(
            out,
            "{}",
            ReadView::new(device.id(), args.characteristic(), &value, painter)
        )?,
    }
    Ok(())
}

/// Executes the `write` command.
pub(crate) async fn run_write<W>(
    manager: &DeviceManager,
    args: &WriteArgs,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let target = args.characteristic();
    let payload = args.payload();
    let device = connect_target(manager, target.target()).await?;
    let written = manager
        .write(
            device.id(),
            target.service(),
            target.characteristic(),
            &payload,
        )
        .await;
    release_target(manager, device.id()).await;
    written?;

    match format {
        OutputFormat::Json => {
            let output = WriteOutput {
                device_id: device.id(),
                service_uuid: target.service(),
                characteristic_uuid: target.characteristic(),
                written: payload.len(),
            };
            writeln!(out, "{}", serde_json::to_string(&output)?)?;
        }
        OutputFormat::Pretty => writeln!(
            out,
            "{}",
            WriteView::new(target.characteristic(), payload.len(), painter)
        )?,
    }
    Ok(())
}
