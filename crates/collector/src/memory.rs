//! Memory collector
//!
//! Reads `/proc/meminfo` and emits one gauge family per reported field,
//! converted from kB to bytes.

use std::collections::HashMap;

use sc_agent_types::{MetricFamily, MetricKind, MetricValue, Sample};

use crate::procfs::ProcPaths;
use crate::registry::{Collector, MetricDescriptor};
use crate::CollectError;

const MEMINFO_FILE: &str = "meminfo";

/// Reported meminfo fields, in emission order.
const FIELDS: [&str; 7] = [
    "MemTotal",
    "MemFree",
    "MemAvailable",
    "Buffers",
    "Cached",
    "SwapTotal",
    "SwapFree",
];

pub struct MemoryCollector {
    procfs: ProcPaths,
}

impl MemoryCollector {
    pub fn new(procfs: ProcPaths) -> Self {
        Self { procfs }
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn describe(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor {
                name: "node_memory_MemTotal_bytes",
                kind: MetricKind::Gauge,
                help: "Memory information field MemTotal_bytes.",
                variable_labels: &[],
            },
            MetricDescriptor {
                name: "node_memory_MemFree_bytes",
                kind: MetricKind::Gauge,
                help: "Memory information field MemFree_bytes.",
                variable_labels: &[],
            },
            MetricDescriptor {
                name: "node_memory_MemAvailable_bytes",
                kind: MetricKind::Gauge,
                help: "Memory information field MemAvailable_bytes.",
                variable_labels: &[],
            },
            MetricDescriptor {
                name: "node_memory_Buffers_bytes",
                kind: MetricKind::Gauge,
                help: "Memory information field Buffers_bytes.",
                variable_labels: &[],
            },
            MetricDescriptor {
                name: "node_memory_Cached_bytes",
                kind: MetricKind::Gauge,
                help: "Memory information field Cached_bytes.",
                variable_labels: &[],
            },
            MetricDescriptor {
                name: "node_memory_SwapTotal_bytes",
                kind: MetricKind::Gauge,
                help: "Memory information field SwapTotal_bytes.",
                variable_labels: &[],
            },
            MetricDescriptor {
                name: "node_memory_SwapFree_bytes",
                kind: MetricKind::Gauge,
                help: "Memory information field SwapFree_bytes.",
                variable_labels: &[],
            },
        ]
    }

    fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let contents = self.procfs.read(MEMINFO_FILE)?;
        let values = parse_meminfo(&contents);

        // Fields absent from this kernel are skipped rather than reported
        // as zero.
        let mut families = Vec::new();
        for field in FIELDS {
            if let Some(kb) = values.get(field) {
                families.push(
                    MetricFamily::new(
                        format!("node_memory_{field}_bytes"),
                        MetricKind::Gauge,
                        format!("Memory information field {field}_bytes."),
                    )
                    .with_sample(Sample::new(MetricValue::Gauge(kb * 1024.0))),
                );
            }
        }

        Ok(families)
    }
}

/// Parse `/proc/meminfo` into field name -> kB value. Lines that do not
/// look like `Name:  <number> kB` are skipped.
fn parse_meminfo(contents: &str) -> HashMap<&str, f64> {
    let mut values = HashMap::new();
    for line in contents.lines() {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        if let Some(value) = rest.split_whitespace().next() {
            if let Ok(kb) = value.parse::<f64>() {
                values.insert(name.trim(), kb);
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const MEMINFO: &str = "MemTotal:       16384 kB\n\
MemFree:         8192 kB\n\
MemAvailable:   12288 kB\n\
Buffers:          512 kB\n\
Cached:          2048 kB\n\
SwapCached:         0 kB\n\
SwapTotal:       4096 kB\n\
SwapFree:        4096 kB\n";

    fn proc_with_meminfo(contents: &str) -> (TempDir, ProcPaths) {
        let dir = TempDir::new().unwrap();
        let mut f = std::fs::File::create(dir.path().join("meminfo")).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        let procfs = ProcPaths::with_root(dir.path());
        (dir, procfs)
    }

    #[test]
    fn test_emits_bytes_from_kb() {
        let (_dir, procfs) = proc_with_meminfo(MEMINFO);
        let families = MemoryCollector::new(procfs).collect().unwrap();

        assert_eq!(families.len(), 7);
        let total = families
            .iter()
            .find(|f| f.name == "node_memory_MemTotal_bytes")
            .unwrap();
        assert_eq!(
            total.samples[0].value,
            MetricValue::Gauge(16384.0 * 1024.0)
        );
    }

    #[test]
    fn test_missing_fields_are_skipped() {
        let (_dir, procfs) = proc_with_meminfo("MemTotal:       1024 kB\n");
        let families = MemoryCollector::new(procfs).collect().unwrap();

        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "node_memory_MemTotal_bytes");
    }

    #[test]
    fn test_unreported_fields_ignored() {
        let (_dir, procfs) =
            proc_with_meminfo("MemTotal: 1024 kB\nHugePages_Total:       0\nDirectMap4k: 1 kB\n");
        let families = MemoryCollector::new(procfs).collect().unwrap();
        assert_eq!(families.len(), 1);
    }
}
