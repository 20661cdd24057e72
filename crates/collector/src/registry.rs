//! Collector capability and registry
//!
//! A [`Collector`] samples one OS subsystem and returns metric families.
//! The [`CollectorRegistry`] owns the enabled set and merges their output
//! each tick; an individual collector failing yields zero samples for that
//! tick without aborting the others.

use std::collections::BTreeMap;

use sc_agent_config::CollectorConfig;
use sc_agent_types::{MetricFamily, MetricKind};
use tracing::{debug, warn};

use crate::procfs::ProcPaths;
use crate::{
    CpuCollector, DiskStatsCollector, FilesystemCollector, LoadAvgCollector, MemoryCollector,
    NetDevCollector,
};

/// Static description of one family a collector can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    /// Family name.
    pub name: &'static str,
    /// Family kind.
    pub kind: MetricKind,
    /// Documentation string.
    pub help: &'static str,
    /// Labels whose values vary per sample (e.g. `device`).
    pub variable_labels: &'static [&'static str],
}

/// A capability that samples one subsystem of the OS.
pub trait Collector: Send + Sync {
    /// Stable name, matching the configuration enable flag.
    fn name(&self) -> &'static str;

    /// The families this collector can emit.
    fn describe(&self) -> Vec<MetricDescriptor>;

    /// Sample the subsystem. Called once per pipeline tick.
    fn collect(&self) -> Result<Vec<MetricFamily>, crate::CollectError>;

    /// Release any held resources. Most collectors are stateless.
    fn close(&self) {}
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("at least one collector must be enabled")]
    NoCollectorsEnabled,
}

/// Ordered set of enabled collectors.
pub struct CollectorRegistry {
    collectors: Vec<Box<dyn Collector>>,
}

impl CollectorRegistry {
    /// Build the registry from the configured enable flags.
    pub fn new(config: &CollectorConfig, procfs: ProcPaths) -> Result<Self, RegistryError> {
        let mut collectors: Vec<Box<dyn Collector>> = Vec::new();

        if config.cpu {
            collectors.push(Box::new(CpuCollector::new(procfs.clone())));
        }
        if config.memory {
            collectors.push(Box::new(MemoryCollector::new(procfs.clone())));
        }
        if config.loadavg {
            collectors.push(Box::new(LoadAvgCollector::new(procfs.clone())));
        }
        if config.diskstats {
            collectors.push(Box::new(DiskStatsCollector::new(procfs.clone())));
        }
        if config.netdev {
            collectors.push(Box::new(NetDevCollector::new(procfs.clone())));
        }
        if config.filesystem {
            collectors.push(Box::new(FilesystemCollector::new(procfs)));
        }

        if collectors.is_empty() {
            return Err(RegistryError::NoCollectorsEnabled);
        }

        debug!(enabled = collectors.len(), "Collector registry initialized");
        Ok(Self { collectors })
    }

    /// Build a registry from explicit collectors (test seam).
    pub fn from_collectors(collectors: Vec<Box<dyn Collector>>) -> Result<Self, RegistryError> {
        if collectors.is_empty() {
            return Err(RegistryError::NoCollectorsEnabled);
        }
        Ok(Self { collectors })
    }

    /// Sample every enabled collector and merge the families in
    /// registration order. A failing collector contributes nothing for
    /// this tick; the rest still run.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        for collector in &self.collectors {
            match collector.collect() {
                Ok(mut collected) => families.append(&mut collected),
                Err(error) => {
                    warn!(collector = collector.name(), %error, "Collector failed, skipping for this tick");
                }
            }
        }
        families
    }

    /// Enabled collector names, for the diagnostics payload.
    pub fn enabled(&self) -> BTreeMap<String, bool> {
        self.collectors
            .iter()
            .map(|c| (c.name().to_string(), true))
            .collect()
    }

    /// Every descriptor across the enabled collectors.
    pub fn describe(&self) -> Vec<MetricDescriptor> {
        self.collectors.iter().flat_map(|c| c.describe()).collect()
    }

    /// Close all collectors.
    pub fn close(&self) {
        for collector in &self.collectors {
            collector.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_agent_types::{MetricValue, Sample};

    struct StaticCollector {
        name: &'static str,
        fail: bool,
    }

    impl Collector for StaticCollector {
        fn name(&self) -> &'static str {
            self.name
        }

        fn describe(&self) -> Vec<MetricDescriptor> {
            vec![]
        }

        fn collect(&self) -> Result<Vec<MetricFamily>, crate::CollectError> {
            if self.fail {
                return Err(crate::CollectError::Read {
                    path: "/proc/missing".into(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
                });
            }
            Ok(vec![MetricFamily::new(
                "static_metric",
                MetricKind::Gauge,
                "A static metric.",
            )
            .with_sample(Sample::new(MetricValue::Gauge(1.0)))])
        }
    }

    #[test]
    fn test_empty_registry_rejected() {
        let config = CollectorConfig {
            cpu: false,
            memory: false,
            loadavg: false,
            diskstats: false,
            netdev: false,
            filesystem: false,
        };
        assert!(matches!(
            CollectorRegistry::new(&config, ProcPaths::default()),
            Err(RegistryError::NoCollectorsEnabled)
        ));
    }

    #[test]
    fn test_failing_collector_does_not_abort_gather() {
        let registry = CollectorRegistry::from_collectors(vec![
            Box::new(StaticCollector {
                name: "broken",
                fail: true,
            }),
            Box::new(StaticCollector {
                name: "working",
                fail: false,
            }),
        ])
        .unwrap();

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "static_metric");
    }

    #[test]
    fn test_enabled_map_reflects_registration() {
        let registry = CollectorRegistry::from_collectors(vec![Box::new(StaticCollector {
            name: "working",
            fail: false,
        })])
        .unwrap();

        let enabled = registry.enabled();
        assert_eq!(enabled.len(), 1);
        assert!(enabled["working"]);
    }

    #[test]
    fn test_full_registry_from_config() {
        let registry =
            CollectorRegistry::new(&CollectorConfig::default(), ProcPaths::default()).unwrap();
        assert_eq!(registry.enabled().len(), 6);
    }
}
