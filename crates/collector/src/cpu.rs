//! CPU time collector
//!
//! Reads the aggregate `cpu` line of `/proc/stat` and emits
//! `node_cpu_seconds_total` with one sample per mode.

use sc_agent_types::{MetricFamily, MetricKind, MetricValue, Sample};

use crate::procfs::{parse_error, ProcPaths};
use crate::registry::{Collector, MetricDescriptor};
use crate::CollectError;

const STAT_FILE: &str = "stat";

/// CPU modes in the column order of `/proc/stat`.
const MODES: [&str; 8] = [
    "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal",
];

pub struct CpuCollector {
    procfs: ProcPaths,
}

impl CpuCollector {
    pub fn new(procfs: ProcPaths) -> Self {
        Self { procfs }
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn describe(&self) -> Vec<MetricDescriptor> {
        vec![MetricDescriptor {
            name: "node_cpu_seconds_total",
            kind: MetricKind::Counter,
            help: "Seconds the CPUs spent in each mode.",
            variable_labels: &["mode"],
        }]
    }

    fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let contents = self.procfs.read(STAT_FILE)?;
        let path = self.procfs.path(STAT_FILE);

        // The aggregate line is "cpu  <user> <nice> ..."; per-core lines
        // are "cpu0", "cpu1", ... and are not reported.
        let aggregate = contents
            .lines()
            .find(|line| line.starts_with("cpu "))
            .ok_or_else(|| parse_error(&path, "missing aggregate cpu line"))?;

        let values: Vec<f64> = aggregate
            .split_whitespace()
            .skip(1)
            .take(MODES.len())
            .map(|field| field.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| parse_error(&path, format!("bad cpu field: {e}")))?;

        if values.len() < MODES.len() {
            return Err(parse_error(
                &path,
                format!("expected {} cpu fields, got {}", MODES.len(), values.len()),
            ));
        }

        let mut family = MetricFamily::new(
            "node_cpu_seconds_total",
            MetricKind::Counter,
            "Seconds the CPUs spent in each mode.",
        );
        for (mode, value) in MODES.iter().zip(values) {
            family = family
                .with_sample(Sample::new(MetricValue::Counter(value)).with_label("mode", *mode));
        }

        Ok(vec![family])
    }
}
