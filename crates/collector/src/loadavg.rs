//! Load average collector
//!
//! Reads `/proc/loadavg` and emits the 1/5/15 minute load gauges.

use sc_agent_types::{MetricFamily, MetricKind};

use crate::procfs::{parse_error, ProcPaths};
use crate::registry::{Collector, MetricDescriptor};
use crate::CollectError;

const LOADAVG_FILE: &str = "loadavg";

pub struct LoadAvgCollector {
    procfs: ProcPaths,
}

impl LoadAvgCollector {
    pub fn new(procfs: ProcPaths) -> Self {
        Self { procfs }
    }
}

impl Collector for LoadAvgCollector {
    fn name(&self) -> &'static str {
        "loadavg"
    }

    fn describe(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor {
                name: "node_load1",
                kind: MetricKind::Gauge,
                help: "1m load average.",
                variable_labels: &[],
            },
            MetricDescriptor {
                name: "node_load5",
                kind: MetricKind::Gauge,
                help: "5m load average.",
                variable_labels: &[],
            },
            MetricDescriptor {
                name: "node_load15",
                kind: MetricKind::Gauge,
                help: "15m load average.",
                variable_labels: &[],
            },
        ]
    }

    fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let contents = self.procfs.read(LOADAVG_FILE)?;
        let path = self.procfs.path(LOADAVG_FILE);

        let mut fields = contents.split_whitespace();
        let mut next_load = |window: &str| -> Result<f64, CollectError> {
            fields
                .next()
                .ok_or_else(|| parse_error(&path, format!("missing {window} load field")))?
                .parse::<f64>()
                .map_err(|e| parse_error(&path, format!("bad {window} load field: {e}")))
        };

        let load1 = next_load("1m")?;
        let load5 = next_load("5m")?;
        let load15 = next_load("15m")?;

        Ok(vec![
            MetricFamily::gauge("node_load1", "1m load average.", load1),
            MetricFamily::gauge("node_load5", "5m load average.", load5),
            MetricFamily::gauge("node_load15", "15m load average.", load15),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_agent_types::MetricValue;
    use std::io::Write;
    use tempfile::TempDir;

    fn proc_with_loadavg(contents: &str) -> (TempDir, ProcPaths) {
        let dir = TempDir::new().unwrap();
        let mut f = std::fs::File::create(dir.path().join("loadavg")).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        let procfs = ProcPaths::with_root(dir.path());
        (dir, procfs)
    }

    #[test]
    fn test_collects_three_windows() {
        let (_dir, procfs) = proc_with_loadavg("0.50 0.40 0.30 1/234 5678\n");
        let families = LoadAvgCollector::new(procfs).collect().unwrap();

        assert_eq!(families.len(), 3);
        assert_eq!(families[0].name, "node_load1");
        assert_eq!(families[0].samples[0].value, MetricValue::Gauge(0.50));
        assert_eq!(families[1].name, "node_load5");
        assert_eq!(families[1].samples[0].value, MetricValue::Gauge(0.40));
        assert_eq!(families[2].name, "node_load15");
        assert_eq!(families[2].samples[0].value, MetricValue::Gauge(0.30));
    }

    #[test]
    fn test_truncated_file_is_error() {
        let (_dir, procfs) = proc_with_loadavg("0.50 0.40\n");
        assert!(LoadAvgCollector::new(procfs).collect().is_err());
    }
}
