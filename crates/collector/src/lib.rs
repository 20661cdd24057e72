//! Linux system metric collectors
//!
//! This crate provides the [`Collector`] capability, the
//! [`CollectorRegistry`] that merges enabled collectors each tick, and the
//! baseline procfs-backed collector set: cpu, memory, loadavg, diskstats,
//! netdev and filesystem. All counters derive from Linux `/proc` and
//! `statvfs` semantics.

pub mod cpu;
pub mod diskstats;
pub mod filesystem;
pub mod loadavg;
pub mod memory;
pub mod netdev;
pub mod procfs;
pub mod registry;

use std::path::PathBuf;
use thiserror::Error;

pub use cpu::CpuCollector;
pub use diskstats::DiskStatsCollector;
pub use filesystem::FilesystemCollector;
pub use loadavg::LoadAvgCollector;
pub use memory::MemoryCollector;
pub use netdev::NetDevCollector;
pub use procfs::ProcPaths;
pub use registry::{Collector, CollectorRegistry, MetricDescriptor, RegistryError};

/// Error from a single collector's sample attempt. The registry absorbs
/// these; they never abort a tick.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}
