use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::error::{CliConfigError, FixtureError};
use crate::hw::{HexPayload, NotificationPayloads, ScanFixture};
use crate::manager::DisconnectClearPolicy;
use crate::settings::ConfigOverrides;

const DEFAULT_SCAN_DURATION: &str = "3s";
const DEFAULT_SCAN_TIMEOUT: &str = "10s";

/// Command-line options for the BLE device hub.
#[derive(Debug, Parser)]
#[command(
    name = "blehub",
    about = "Discover, inspect and talk to BLE peripherals across adapters."
)]
pub struct Args {
    /// Uses in-memory fake adapters with fixture-driven discovery and payloads.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake discovery fixtures in the form `adapter|device_id|name;...` (`-` for no name).
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Value returned by fake reads, as hexadecimal bytes.
    #[arg(long, global = true, requires = "fake")]
    fake_read: Option<HexPayload>,
    /// Fake notification payloads as comma-separated hexadecimal payloads.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Artificial fake radio latency (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_latency: Option<Duration>,
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Settings file; defaults to `settings.json` in the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// How long a discovered device stays listed after its last advertisement.
    #[arg(long, global = true, value_parser = parse_duration)]
    discovery_ttl: Option<Duration>,
    /// Deadline for each adapter radio operation.
    #[arg(long, global = true, value_parser = parse_duration)]
    operation_timeout: Option<Duration>,
    /// What the discovery list forgets when a device disconnects.
    #[arg(long, global = true, value_enum)]
    clear_policy: Option<DisconnectClearPolicy>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use blehub::{Args, Command, ScanArgs};
    ///
    /// let args = Args::new(Command::Scan(ScanArgs::new(Duration::from_secs(1))));
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            fake: false,
            fake_scan: None,
            fake_read: None,
            fake_notifications: None,
            fake_latency: None,
            log_level: None,
            output: None,
            config: None,
            discovery_ttl: None,
            operation_timeout: None,
            clear_policy: None,
            command,
        }
    }

    /// Enables fake adapter mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            read_value,
            notifications,
            latency,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_read = read_value;
        self.fake_notifications = notifications;
        self.fake_latency = Some(latency);
        self
    }

    /// Selects the output format explicitly.
    #[must_use]
    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = Some(output);
        self
    }

    /// Returns the `--log-level` override, if any.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the `--output` override, if any.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Returns the explicit settings file path, if any.
    #[must_use]
    pub fn config_path(&self) -> Option<&std::path::Path> {
        self.config.as_deref()
    }

    pub(crate) fn config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            discovery_ttl: self.discovery_ttl,
            operation_timeout: self.operation_timeout,
            disconnect_clear_policy: self.clear_policy,
        }
    }

    /// Splits parsed CLI arguments into command and optional fake-adapter settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_read,
            fake_notifications,
            fake_latency,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                read_value: fake_read,
                notifications: fake_notifications,
                latency: fake_latency.unwrap_or(Duration::ZERO),
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake adapter arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    read_value: Option<HexPayload>,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    #[builder(default)]
    latency: Duration,
}

impl FakeArgs {
    pub(crate) fn into_parts(
        self,
    ) -> (
        ScanFixture,
        Option<Vec<u8>>,
        Option<Vec<Vec<u8>>>,
        Duration,
    ) {
        (
            self.scan_fixture,
            self.read_value.map(Into::into),
            self.notifications.map(Into::into),
            self.latency,
        )
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables for humans.
    Pretty,
    /// One JSON document (or one JSON line per notification).
    Json,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for a while, then list every discovered device.
    Scan(ScanArgs),
    /// Connect to a device and list its GATT services.
    Services(DeviceArgs),
    /// Connect to a device and list the characteristics of one service.
    Characteristics(ServiceArgs),
    /// Connect to a device and read one characteristic.
    Read(CharacteristicArgs),
    /// Connect to a device and write one characteristic.
    Write(WriteArgs),
    /// Connect to a device and print value changes of one characteristic.
    Listen(ListenArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan",
            Self::Services(_) => "services",
            Self::Characteristics(_) => "characteristics",
            Self::Read(_) => "read",
            Self::Write(_) => "write",
            Self::Listen(_) => "listen",
        }
    }
}

/// Arguments for the `scan` command.
#[derive(Debug, Clone, clap::Args)]
pub struct ScanArgs {
    /// How long to scan before listing devices.
    #[arg(long, default_value = DEFAULT_SCAN_DURATION, value_parser = parse_duration)]
    duration: Duration,
}

impl ScanArgs {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub(crate) fn duration(&self) -> Duration {
        self.duration
    }
}

/// Selects one device.
#[derive(Debug, Clone, clap::Args)]
pub struct DeviceArgs {
    /// Device identifier as listed by `scan`.
    #[arg(long)]
    device: String,
    /// How long to wait for the device to be discovered.
    #[arg(long, default_value = DEFAULT_SCAN_TIMEOUT, value_parser = parse_duration)]
    scan_timeout: Duration,
}

impl DeviceArgs {
    #[must_use]
    pub fn new(device: impl Into<String>, scan_timeout: Duration) -> Self {
        Self {
            device: device.into(),
            scan_timeout,
        }
    }

    pub(crate) fn device(&self) -> &str {
        &self.device
    }

    pub(crate) fn scan_timeout(&self) -> Duration {
        self.scan_timeout
    }
}

/// Selects one service on a device.
#[derive(Debug, Clone, clap::Args)]
pub struct ServiceArgs {
    #[command(flatten)]
    target: DeviceArgs,
    /// Service UUID.
    #[arg(long)]
    service: String,
}

impl ServiceArgs {
    #[must_use]
    pub fn new(target: DeviceArgs, service: impl Into<String>) -> Self {
        Self {
            target,
            service: service.into(),
        }
    }

    pub(crate) fn target(&self) -> &DeviceArgs {
        &self.target
    }

    pub(crate) fn service(&self) -> &str {
        &self.service
    }
}

/// Selects one characteristic on a device.
#[derive(Debug, Clone, clap::Args)]
pub struct CharacteristicArgs {
    #[command(flatten)]
    service: ServiceArgs,
    /// Characteristic UUID.
    #[arg(long)]
    characteristic: String,
}

impl CharacteristicArgs {
    #[must_use]
    pub fn new(service: ServiceArgs, characteristic: impl Into<String>) -> Self {
        Self {
            service,
            characteristic: characteristic.into(),
        }
    }

    pub(crate) fn target(&self) -> &DeviceArgs {
        self.service.target()
    }

    pub(crate) fn service(&self) -> &str {
        self.service.service()
    }

    pub(crate) fn characteristic(&self) -> &str {
        &self.characteristic
    }
}

/// Arguments for the `write` command.
#[derive(Debug, Clone, clap::Args)]
pub struct WriteArgs {
    #[command(flatten)]
    characteristic: CharacteristicArgs,
    /// Payload as hexadecimal bytes, e.g. `01ff`.
    #[arg(long)]
    hex: HexPayload,
}

impl WriteArgs {
    pub(crate) fn characteristic(&self) -> &CharacteristicArgs {
        &self.characteristic
    }

    pub(crate) fn payload(&self) -> Vec<u8> {
        self.hex.clone().into()
    }
}

/// Arguments for the `listen` command.
#[derive(Debug, Clone, clap::Args)]
pub struct ListenArgs {
    #[command(flatten)]
    characteristic: CharacteristicArgs,
    /// Stop after this many value changes. If omitted, listen until Ctrl+C.
    #[arg(long)]
    max_notifications: Option<usize>,
}

impl ListenArgs {
    #[must_use]
    pub fn new(characteristic: CharacteristicArgs, max_notifications: Option<usize>) -> Self {
        Self {
            characteristic,
            max_notifications,
        }
    }

    pub(crate) fn characteristic(&self) -> &CharacteristicArgs {
        &self.characteristic
    }

    pub(crate) fn max_notifications(&self) -> Option<usize> {
        self.max_notifications
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["blehub", "--fake", "scan"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_fixture_flags_require_fake_mode() {
        let result = Args::try_parse_from(["blehub", "--fake-read", "DEADBEEF", "scan"]);

        let error = result.expect_err("fake payload flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn malformed_fixture_fails_parsing() {
        let result = Args::try_parse_from(["blehub", "--fake", "--fake-scan", "hci0|AA", "scan"]);

        let error = result.expect_err("two-field record should be rejected");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from([
            "blehub",
            "--fake",
            "--fake-scan",
            "hci0|AA:BB:CC|Thermo",
            "scan",
        ])
        .expect("valid fake arguments should parse");

        let (command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::Scan(_));
        assert_matches!(fake_args, Some(_));
    }

    #[test]
    fn write_arguments_flatten_device_service_and_characteristic() {
        let cli = Args::try_parse_from([
            "blehub",
            "write",
            "--device",
            "AA:BB",
            "--service",
            "ffe0",
            "--characteristic",
            "ffe1",
            "--hex",
            "0102",
        ])
        .expect("write arguments should parse");

        let (command, _) = cli
            .into_command_and_fake_args()
            .expect("real mode needs no fake settings");
        let Command::Write(args) = command else {
            panic!("expected write command");
        };
        assert_eq!("AA:BB", args.characteristic().target().device());
        assert_eq!("ffe0", args.characteristic().service());
        assert_eq!("ffe1", args.characteristic().characteristic());
        assert_eq!(vec![0x01, 0x02], args.payload());
        assert_eq!(Duration::from_secs(10), args.characteristic().target().scan_timeout());
    }

    #[test]
    fn manager_flags_become_config_overrides() {
        let cli = Args::try_parse_from([
            "blehub",
            "--discovery-ttl",
            "2s",
            "--clear-policy",
            "device",
            "scan",
        ])
        .expect("manager flags should parse");

        let overrides = cli.config_overrides();
        assert_eq!(Some(Duration::from_secs(2)), overrides.discovery_ttl);
        assert_eq!(None, overrides.operation_timeout);
        assert_eq!(
            Some(DisconnectClearPolicy::DeviceOnly),
            overrides.disconnect_clear_policy
        );
    }
}
