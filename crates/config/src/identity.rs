//! VM identity resolution
//!
//! Resolves the stable VM identifier by probing sources in a fixed order:
//! firmware UUID via `dmidecode`, the systemd machine id, the kernel boot
//! id, and finally the host name. The first non-empty, non-sentinel value
//! wins. Resolution runs exactly once, during configuration validation.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

/// Hard timeout for each `dmidecode` invocation, independent of any caller
/// deadline.
const DMIDECODE_TIMEOUT: Duration = Duration::from_secs(5);

/// `dmidecode` output values that mean "no usable UUID".
const INVALID_UUID_VALUES: &[&str] = &["", "Not Settable", "Not Specified"];

/// Prefix of the all-zero UUID some hypervisors report.
const ZERO_UUID_PREFIX: &str = "00000000-0000-0000";

/// Probe locations for identity resolution. Overridable so tests can point
/// at synthetic files.
#[derive(Debug, Clone)]
pub struct IdentityProbes {
    /// Candidate `dmidecode` commands, tried in order. Absolute paths
    /// first, then a bare name resolved through PATH.
    pub dmidecode_commands: Vec<PathBuf>,
    /// systemd machine identifier file.
    pub machine_id_path: PathBuf,
    /// Kernel boot identifier file.
    pub boot_id_path: PathBuf,
    /// Kernel host name file.
    pub hostname_path: PathBuf,
}

impl Default for IdentityProbes {
    fn default() -> Self {
        Self {
            dmidecode_commands: vec![
                PathBuf::from("/usr/sbin/dmidecode"),
                PathBuf::from("/sbin/dmidecode"),
                PathBuf::from("dmidecode"),
            ],
            machine_id_path: PathBuf::from("/etc/machine-id"),
            boot_id_path: PathBuf::from("/proc/sys/kernel/random/boot_id"),
            hostname_path: PathBuf::from("/proc/sys/kernel/hostname"),
        }
    }
}

/// Resolve the VM identity, returning `None` when every probe fails.
pub fn resolve(probes: &IdentityProbes) -> Option<String> {
    if let Some(uuid) = firmware_uuid(probes) {
        debug!(source = "dmidecode", "Resolved VM identity");
        return Some(uuid);
    }

    for (path, source) in [
        (&probes.machine_id_path, "machine-id"),
        (&probes.boot_id_path, "boot-id"),
        (&probes.hostname_path, "hostname"),
    ] {
        if let Some(value) = read_trimmed(path) {
            debug!(source, "Resolved VM identity");
            return Some(value);
        }
    }

    None
}

/// Try each `dmidecode` candidate for a usable firmware UUID.
fn firmware_uuid(probes: &IdentityProbes) -> Option<String> {
    for command in &probes.dmidecode_commands {
        match run_dmidecode(command) {
            Some(uuid) if is_usable_uuid(&uuid) => return Some(uuid),
            Some(uuid) => {
                debug!(command = %command.display(), value = %uuid, "dmidecode returned invalid VM identity");
            }
            None => {
                debug!(command = %command.display(), "dmidecode probe failed");
            }
        }
    }
    None
}

/// Run `<command> -s system-uuid` with the hard probe timeout, killing the
/// child if it overruns. Returns the trimmed stdout.
fn run_dmidecode(command: &Path) -> Option<String> {
    let mut child = Command::new(command)
        .args(["-s", "system-uuid"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + DMIDECODE_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return None;
                }
                break;
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    debug!(command = %command.display(), "dmidecode timed out");
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }

    let mut stdout = child.stdout.take()?;
    let mut output = String::new();
    std::io::Read::read_to_string(&mut stdout, &mut output).ok()?;
    Some(output.trim().to_string())
}

fn is_usable_uuid(value: &str) -> bool {
    !INVALID_UUID_VALUES.contains(&value) && !value.starts_with(ZERO_UUID_PREFIX)
}

fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
