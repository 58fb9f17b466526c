use clap::Parser;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
const BATTERY_LEVEL: &str = "00002a19-0000-1000-8000-00805f9b34fb";
const SERIAL_SERVICE: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";
const SERIAL_DATA: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl blehub::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(args: blehub::Args) -> anyhow::Result<String> {
    let mut output = Vec::new();
    blehub::run_with_clients(args, &mut output, &FakeTerminalClient).await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv<const N: usize>(argv: [&str; N]) -> anyhow::Result<String> {
    let parsed_args = blehub::Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args).await
}

fn json_lines(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("every line should be JSON"))
        .collect()
}

#[tokio::test]
async fn scan_lists_devices_from_every_fake_adapter() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blehub",
        "--fake",
        "--fake-scan",
        "hci0|AA:BB:CC|Thermo;hci1|11:22:33|-",
        "scan",
        "--duration",
        "0s",
    ])
    .await?;

    assert_eq!(
        vec![json!([
            { "id": "11:22:33", "name": null, "adapter_name": "hci1", "state": "discovered" },
            { "id": "AA:BB:CC", "name": "Thermo", "adapter_name": "hci0", "state": "discovered" },
        ])],
        json_lines(&stdout)
    );
    Ok(())
}

#[tokio::test]
async fn scan_renders_a_table_in_pretty_mode() -> anyhow::Result<()> {
    let fake = blehub::FakeArgs::builder()
        .scan_fixture("hci0|AA:BB:CC|Thermo")?
        .build();
    let args = blehub::Args::new(blehub::Command::Scan(blehub::ScanArgs::new(
        std::time::Duration::ZERO,
    )))
    .with_fake(fake)
    .with_output(blehub::OutputFormat::Pretty);

    let stdout = run_with_parsed_args(args).await?;

    assert!(stdout.starts_with("Devices:"), "unexpected output: {stdout}");
    assert!(stdout.contains("AA:BB:CC"));
    assert!(stdout.contains("Thermo"));
    Ok(())
}

#[tokio::test]
async fn services_lists_the_fake_gatt_layout() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blehub",
        "--fake",
        "--fake-scan",
        "hci0|AA:BB:CC|Thermo",
        "services",
        "--device",
        "AA:BB:CC",
    ])
    .await?;

    let lines = json_lines(&stdout);
    let services = lines[0].as_array().expect("services should be an array");
    let uuids: Vec<&str> = services
        .iter()
        .filter_map(|service| service["uuid"].as_str())
        .collect();
    assert_eq!(
        vec![
            BATTERY_SERVICE,
            "0000180a-0000-1000-8000-00805f9b34fb",
            SERIAL_SERVICE
        ],
        uuids
    );
    Ok(())
}

#[tokio::test]
async fn read_reports_hex_and_text() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blehub",
        "--fake",
        "--fake-scan",
        "hci0|AA:BB:CC|Thermo",
        "--fake-read",
        "32 31",
        "read",
        "--device",
        "AA:BB:CC",
        "--service",
        BATTERY_SERVICE,
        "--characteristic",
        BATTERY_LEVEL,
    ])
    .await?;

    assert_eq!(
        vec![json!({
            "device_id": "AA:BB:CC",
            "service_uuid": BATTERY_SERVICE,
            "characteristic_uuid": BATTERY_LEVEL,
            "value": "3231",
            "text": "21",
        })],
        json_lines(&stdout)
    );
    Ok(())
}

#[tokio::test]
async fn write_reports_the_payload_size() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blehub",
        "--fake",
        "--fake-scan",
        "hci0|AA:BB:CC|Thermo",
        "write",
        "--device",
        "AA:BB:CC",
        "--service",
        SERIAL_SERVICE,
        "--characteristic",
        SERIAL_DATA,
        "--hex",
        "01ff",
    ])
    .await?;

    assert_eq!(
        vec![json!({
            "device_id": "AA:BB:CC",
            "service_uuid": SERIAL_SERVICE,
            "characteristic_uuid": SERIAL_DATA,
            "written": 2,
        })],
        json_lines(&stdout)
    );
    Ok(())
}

#[tokio::test]
async fn listen_stops_after_the_requested_value_changes() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blehub",
        "--fake",
        "--fake-scan",
        "hci0|AA:BB:CC|Thermo",
        "--fake-notifications",
        "3231,3232,3233",
        "listen",
        "--device",
        "AA:BB:CC",
        "--service",
        BATTERY_SERVICE,
        "--characteristic",
        BATTERY_LEVEL,
        "--max-notifications",
        "2",
    ])
    .await?;

    let event = |value: &str| {
        json!({
            "device_id": "AA:BB:CC",
            "service_uuid": BATTERY_SERVICE,
            "characteristic_uuid": BATTERY_LEVEL,
            "value": value,
        })
    };
    assert_eq!(
        vec![
            event("3231"),
            event("3232"),
            json!({ "received": 2, "stopped": { "reason": "reached_limit", "limit": 2 } }),
        ],
        json_lines(&stdout)
    );
    Ok(())
}

#[tokio::test]
async fn listen_prints_value_changes_in_pretty_mode() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "blehub",
        "--output",
        "pretty",
        "--fake",
        "--fake-scan",
        "hci0|AA:BB:CC|Thermo",
        "--fake-notifications",
        "32312e35",
        "listen",
        "--device",
        "AA:BB:CC",
        "--service",
        BATTERY_SERVICE,
        "--characteristic",
        BATTERY_LEVEL,
        "--max-notifications",
        "1",
    ])
    .await?;

    assert!(stdout.starts_with("Listening for value changes:"));
    assert!(stdout.contains("[0001] 32 31 2E 35 text=21.5"));
    assert!(
        stdout
            .trim_end()
            .ends_with("Stopped: reached limit of 1 - received 1 value change(s)")
    );
    Ok(())
}

#[tokio::test]
async fn undiscovered_device_fails_after_the_scan_timeout() {
    let result = run_with_argv([
        "blehub",
        "--fake",
        "--fake-scan",
        "hci0|AA:BB:CC|Thermo",
        "services",
        "--device",
        "DE:AD:00",
        "--scan-timeout",
        "200ms",
    ])
    .await;

    let error = result.expect_err("unknown device should fail");
    assert_eq!(
        "device `DE:AD:00` was not discovered within 200ms",
        error.to_string()
    );
}

#[tokio::test]
async fn unknown_service_is_reported() {
    let result = run_with_argv([
        "blehub",
        "--fake",
        "--fake-scan",
        "hci0|AA:BB:CC|Thermo",
        "characteristics",
        "--device",
        "AA:BB:CC",
        "--service",
        "1234",
    ])
    .await;

    let error = result.expect_err("unknown service should fail");
    assert_eq!(
        "service `1234` was not found on device `AA:BB:CC`",
        error.to_string()
    );
}

#[test]
fn invalid_fixture_is_rejected_by_the_builder() {
    let result = blehub::FakeArgs::builder().scan_fixture("invalid-record");
    assert!(matches!(
        result,
        Err(blehub::FixtureError::InvalidRecordFieldCount)
    ));
}
