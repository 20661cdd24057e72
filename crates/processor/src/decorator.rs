//! Metric decoration
//!
//! Injects the VM identity and the operator's static labels into every
//! sample. Decoration is a pure function: the input families are left
//! untouched and the same input always produces the same output.

use std::collections::BTreeMap;

use sc_agent_types::MetricFamily;
use tracing::debug;

/// Label key carrying the VM identity on every sample.
pub const VM_ID_LABEL: &str = "vm_id";

pub struct Decorator {
    vm_id: String,
    labels: BTreeMap<String, String>,
}

impl Decorator {
    pub fn new(vm_id: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self {
            vm_id: vm_id.into(),
            labels,
        }
    }

    /// The configured VM identity.
    pub fn vm_id(&self) -> &str {
        &self.vm_id
    }

    /// Return decorated copies of the families, same length and order.
    ///
    /// Existing sample labels always win; decoration never overwrites a
    /// key. Colliding static labels are a configuration defect rejected
    /// at startup, not here.
    pub fn decorate(&self, families: &[MetricFamily]) -> Vec<MetricFamily> {
        let decorated: Vec<MetricFamily> = families
            .iter()
            .map(|family| {
                let mut family = family.clone();
                for sample in &mut family.samples {
                    sample
                        .labels
                        .entry(VM_ID_LABEL.to_string())
                        .or_insert_with(|| self.vm_id.clone());
                    for (key, value) in &self.labels {
                        sample
                            .labels
                            .entry(key.clone())
                            .or_insert_with(|| value.clone());
                    }
                }
                family
            })
            .collect();

        debug!(families = decorated.len(), "Decorated metric families");
        decorated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_agent_types::{MetricKind, MetricValue, Sample};

    fn families() -> Vec<MetricFamily> {
        vec![
            MetricFamily::new(
                "node_cpu_seconds_total",
                MetricKind::Counter,
                "Seconds the CPUs spent in each mode.",
            )
            .with_sample(Sample::new(MetricValue::Counter(100.0)).with_label("mode", "user"))
            .with_sample(Sample::new(MetricValue::Counter(900.0)).with_label("mode", "idle")),
            MetricFamily::gauge("node_load1", "1m load average.", 0.5),
        ]
    }

    fn decorator() -> Decorator {
        Decorator::new(
            "vm-123",
            BTreeMap::from([("env".to_string(), "prod".to_string())]),
        )
    }

    #[test]
    fn test_every_sample_gets_vm_id_and_static_labels() {
        let decorated = decorator().decorate(&families());

        assert_eq!(decorated.len(), 2);
        for family in &decorated {
            for sample in &family.samples {
                assert_eq!(sample.labels[VM_ID_LABEL], "vm-123");
                assert_eq!(sample.labels["env"], "prod");
            }
        }
    }

    #[test]
    fn test_existing_labels_preserved() {
        let decorated = decorator().decorate(&families());
        let modes: Vec<_> = decorated[0]
            .samples
            .iter()
            .map(|s| s.labels["mode"].clone())
            .collect();
        assert_eq!(modes, vec!["user", "idle"]);
    }

    #[test]
    fn test_never_overwrites_existing_key() {
        let input = vec![MetricFamily::new(
            "m",
            MetricKind::Gauge,
            "Help.",
        )
        .with_sample(Sample::new(MetricValue::Gauge(1.0)).with_label("env", "collector-owned"))];

        let decorated = decorator().decorate(&input);
        assert_eq!(decorated[0].samples[0].labels["env"], "collector-owned");
    }

    #[test]
    fn test_input_is_not_mutated() {
        let input = families();
        let before = input.clone();
        let _ = decorator().decorate(&input);
        assert_eq!(input, before);
    }

    #[test]
    fn test_decoration_is_deterministic() {
        let input = families();
        let decorator = decorator();
        assert_eq!(decorator.decorate(&input), decorator.decorate(&input));
    }

    #[test]
    fn test_empty_input() {
        assert!(decorator().decorate(&[]).is_empty());
    }
}
