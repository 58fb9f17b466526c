use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::{instrument, warn};

use crate::cli::ui::Painter;
use crate::cli::{Args, Command, FakeArgs, LogLevel, OutputFormat};
use crate::hw::{BleAdapter, BtleplugAdapter, FakeAdapter};
use crate::manager::DeviceManager;
use crate::notification::BroadcastSink;
use crate::settings::Settings;
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

const SERVICE_NAME: &str = "blehub";

/// Builds one fake adapter per adapter named in the scan fixture.
///
/// ```
/// let fake_args = blehub::FakeArgs::builder()
///     .scan_fixture("hci0|AA:BB|Thermo;hci1|CC:DD|-")?
///     .build();
/// assert_eq!(2, blehub::fake_adapters(fake_args).len());
/// # Ok::<(), blehub::FixtureError>(())
/// ```
#[must_use]
pub fn fake_adapters(fake_args: FakeArgs) -> Vec<Arc<dyn BleAdapter>> {
    let (scan_fixture, read_value, notifications, latency) = fake_args.into_parts();
    scan_fixture
        .by_adapter()
        .into_iter()
        .map(|(name, devices)| {
            let adapter = FakeAdapter::builder()
                .name(name)
                .devices(devices)
                .maybe_read_value(read_value.clone())
                .maybe_notifications(notifications.clone())
                .latency(latency)
                .build();
            Arc::new(adapter) as Arc<dyn BleAdapter>
        })
        .collect()
}

/// Builds one adapter per BLE controller available on this host.
///
/// # Errors
///
/// Returns an error when the platform BLE stack cannot be queried.
pub async fn real_adapters() -> Result<Vec<Arc<dyn BleAdapter>>> {
    let adapters = BtleplugAdapter::discover().await?;
    if adapters.is_empty() {
        warn!("no BLE adapters found on this host");
    }
    Ok(adapters
        .into_iter()
        .map(|adapter| Arc::new(adapter) as Arc<dyn BleAdapter>)
        .collect())
}

/// Runs parsed CLI arguments against the real terminal.
///
/// # Errors
///
/// Returns an error if settings, adapters, the command itself or output
/// writing fail.
pub async fn run<W>(args: Args, out: &mut W) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(args, out, &SystemTerminalClient).await
}

/// Runs parsed CLI arguments with an injected terminal client.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl blehub::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = blehub::Args::try_parse_from([
///     "blehub",
///     "--fake",
///     "--fake-scan",
///     "hci0|AA:BB:CC|Thermo",
///     "scan",
///     "--duration",
///     "0s",
/// ])?;
/// let mut out = Vec::new();
/// blehub::run_with_clients(args, &mut out, &FakeTerminal).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if settings, adapters, the command itself or output
/// writing fail.
pub async fn run_with_clients<W>(
    args: Args,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
) -> Result<()>
where
    W: io::Write,
{
    let log_level = args.log_level();
    telemetry::initialise_tracing(
        SERVICE_NAME,
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let format = args
        .output_format()
        .unwrap_or(if terminal_client.stdout_is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        });
    let config = Settings::load(args.config_path())?.manager_config(args.config_overrides());
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let adapters = match maybe_fake_args {
        Some(fake_args) => fake_adapters(fake_args),
        None => real_adapters().await?,
    };

    let sink = Arc::new(BroadcastSink::new());
    let manager = DeviceManager::start(adapters, sink.clone(), config).await?;
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let result = run_command(&manager, &sink, command, out, format, &painter).await;
    manager.shutdown().await;
    result
}

#[instrument(
    skip_all,
    level = "info",
    fields(command = command.name(), ?format)
)]
async fn run_command<W>(
    manager: &DeviceManager,
    sink: &BroadcastSink,
    command: Command,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    match command {
        Command::Scan(args) => crate::cli::scan::run(manager, &args, out, format, painter).await,
        Command::Services(args) => {
            crate::cli::gatt::run_services(manager, &args, out, format, painter).await
        }
        Command::Characteristics(args) => {
            crate::cli::gatt::run_characteristics(manager, &args, out, format, painter).await
        }
        Command::Read(args) => crate::cli::io::run_read(manager, &args, out, format, painter).await,
        Command::Write(args) => {
            crate::cli::io::run_write(manager, &args, out, format, painter).await
        }
        Command::Listen(args) => {
            crate::cli::listen::run(manager, sink, &args, out, format, painter).await
        }
    }
}
