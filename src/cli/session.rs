use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument};

use crate::cli::command::DeviceArgs;
use crate::error::CliConfigError;
use crate::hw::Device;
use crate::manager::DeviceManager;

const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Waits for the target device to be discovered, then connects to it.
#[instrument(skip(manager, target), level = "info", fields(device_id = target.device()))]
pub(crate) async fn connect_target(manager: &DeviceManager, target: &DeviceArgs) -> Result<Device> {
    wait_for_discovery(manager, target.device(), target.scan_timeout()).await?;
    manager
        .connect(target.device())
        .await
        .with_context(|| format!("failed to connect to `{}`", target.device()))
}

/// Disconnects after a command; failures only matter to the logs.
pub(crate) async fn release_target(manager: &DeviceManager, device_id: &str) {
    if let Err(error) = manager.disconnect(device_id).await {
        debug!(device_id, %error, "disconnect after command failed");
    }
}

async fn wait_for_discovery(
    manager: &DeviceManager,
    device_id: &str,
    waited: Duration,
) -> Result<(), CliConfigError> {
    let poll = async {
        loop {
            manager.sync_events().await;
            if manager.get_device(device_id).is_ok() {
                return;
            }
            sleep(DISCOVERY_POLL_INTERVAL).await;
        }
    };
    timeout(waited, poll)
        .await
        .map_err(|_elapsed| CliConfigError::DeviceNotDiscovered {
            device_id: device_id.to_string(),
            waited,
        })
}
