//! Self-update probe
//!
//! Once an hour the agent asks the package manager whether a newer
//! `sc-metrics-agent` package is available and, if so, triggers the
//! external updater unit. The agent never replaces itself in-process.

use tokio::process::Command;
use tracing::{debug, error, info};

const PACKAGE_NAME: &str = "sc-metrics-agent";
const UPDATER_UNIT: &str = "sc-metrics-agent-updater.service";

/// Check for a pending package upgrade and hand off to the updater unit.
pub async fn check_for_updates() {
    let output = match Command::new("apt")
        .args(["list", "--upgradable", PACKAGE_NAME])
        .output()
        .await
    {
        Ok(output) => output,
        Err(error) => {
            debug!(%error, "Failed to check for updates");
            return;
        }
    };

    let listing = String::from_utf8_lossy(&output.stdout);
    if !listing.contains(PACKAGE_NAME) {
        debug!("No updates available");
        return;
    }

    info!("Update available, triggering updater service");
    match Command::new("systemctl")
        .args(["start", UPDATER_UNIT])
        .status()
        .await
    {
        Ok(status) if status.success() => info!("Updater service triggered"),
        Ok(status) => error!(?status, "Updater service trigger exited with failure"),
        Err(error) => error!(%error, "Failed to trigger updater service"),
    }
}
