//! Filesystem collector
//!
//! Reads the mount table and emits size/free/available gauges per real
//! filesystem, via `statvfs`. Pseudo filesystems and non-device sources
//! are skipped.

use std::ffi::CString;

use sc_agent_types::{MetricFamily, MetricKind, MetricValue, Sample};
use tracing::debug;

use crate::procfs::ProcPaths;
use crate::registry::{Collector, MetricDescriptor};
use crate::CollectError;

const MOUNTS_FILE: &str = "mounts";

/// Filesystem types excluded from collection.
const IGNORED_FS_TYPES: &[&str] = &[
    "autofs",
    "binfmt_misc",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "overlay",
    "proc",
    "procfs",
    "pstore",
    "rpc_pipefs",
    "securityfs",
    "selinuxfs",
    "squashfs",
    "sysfs",
    "tmpfs",
    "tracefs",
    "nfs",
    "nfs4",
    "cifs",
    "smb",
];

/// One reportable mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
}

/// Space numbers for one mount, in bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FsSpace {
    pub size_bytes: f64,
    pub free_bytes: f64,
    pub avail_bytes: f64,
}

pub struct FilesystemCollector {
    procfs: ProcPaths,
    statter: fn(&str) -> Option<FsSpace>,
}

impl FilesystemCollector {
    pub fn new(procfs: ProcPaths) -> Self {
        Self {
            procfs,
            statter: statvfs_space,
        }
    }

    /// Replace the `statvfs` call (test seam).
    #[doc(hidden)]
    pub fn with_statter(procfs: ProcPaths, statter: fn(&str) -> Option<FsSpace>) -> Self {
        Self { procfs, statter }
    }
}

/// Parse the mount table, keeping only real device-backed filesystems.
/// Lines are `source mountpoint fstype options dump pass`.
pub fn parse_mounts(contents: &str) -> Vec<Mount> {
    let mut mounts = Vec::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let (device, mountpoint, fstype) = (fields[0], fields[1], fields[2]);

        if IGNORED_FS_TYPES.contains(&fstype) {
            continue;
        }
        if !device.starts_with("/dev/") {
            continue;
        }

        mounts.push(Mount {
            device: device.to_string(),
            mountpoint: mountpoint.to_string(),
            fstype: fstype.to_string(),
        });
    }
    mounts
}

/// Query filesystem space via `statvfs(2)`.
fn statvfs_space(mountpoint: &str) -> Option<FsSpace> {
    let c_path = CString::new(mountpoint).ok()?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return None;
    }

    let block_size = stat.f_frsize as f64;
    Some(FsSpace {
        size_bytes: stat.f_blocks as f64 * block_size,
        free_bytes: stat.f_bfree as f64 * block_size,
        avail_bytes: stat.f_bavail as f64 * block_size,
    })
}

impl Collector for FilesystemCollector {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn describe(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor {
                name: "node_filesystem_size_bytes",
                kind: MetricKind::Gauge,
                help: "Filesystem size in bytes.",
                variable_labels: &["device", "fstype", "mountpoint"],
            },
            MetricDescriptor {
                name: "node_filesystem_free_bytes",
                kind: MetricKind::Gauge,
                help: "Filesystem free space in bytes.",
                variable_labels: &["device", "fstype", "mountpoint"],
            },
            MetricDescriptor {
                name: "node_filesystem_avail_bytes",
                kind: MetricKind::Gauge,
                help: "Filesystem space available to non-root users in bytes.",
                variable_labels: &["device", "fstype", "mountpoint"],
            },
        ]
    }

    fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let contents = self.procfs.read(MOUNTS_FILE)?;
        let mounts = parse_mounts(&contents);

        let mut size = MetricFamily::new(
            "node_filesystem_size_bytes",
            MetricKind::Gauge,
            "Filesystem size in bytes.",
        );
        let mut free = MetricFamily::new(
            "node_filesystem_free_bytes",
            MetricKind::Gauge,
            "Filesystem free space in bytes.",
        );
        let mut avail = MetricFamily::new(
            "node_filesystem_avail_bytes",
            MetricKind::Gauge,
            "Filesystem space available to non-root users in bytes.",
        );

        for mount in mounts {
            let Some(space) = (self.statter)(&mount.mountpoint) else {
                debug!(mountpoint = %mount.mountpoint, "statvfs failed, skipping mount");
                continue;
            };

            let sample = |value: f64| {
                Sample::new(MetricValue::Gauge(value))
                    .with_label("device", mount.device.clone())
                    .with_label("fstype", mount.fstype.clone())
                    .with_label("mountpoint", mount.mountpoint.clone())
            };
            size.samples.push(sample(space.size_bytes));
            free.samples.push(sample(space.free_bytes));
            avail.samples.push(sample(space.avail_bytes));
        }

        Ok(vec![size, free, avail])
    }
}
