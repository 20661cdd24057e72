//! Wire-form metric records
//!
//! [`MetricRecord`] is the flattened unit the write client serializes: one
//! record per time-series point, with histograms and summaries already
//! expanded into `_bucket`/`_count`/`_sum` records by the aggregator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire-level record type. Histograms and summaries never appear here;
/// their expansion yields counters and gauges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Counter,
    Gauge,
    Untyped,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Untyped => "untyped",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The flattened record shape sent to the ingestor.
///
/// Serializes to exactly:
/// `{"name": ..., "labels": {...}, "value": ..., "timestamp": ..., "type": ...}`
/// with labels in ascending key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Metric identifier.
    pub name: String,
    /// Label mapping, unique keys, serialized in key order.
    pub labels: BTreeMap<String, String>,
    /// Sample value.
    pub value: f64,
    /// Milliseconds since the Unix epoch; always set before serialization.
    pub timestamp: i64,
    /// Record type tag.
    #[serde(rename = "type")]
    pub record_type: RecordType,
}

impl MetricRecord {
    /// Sort key combining the record name and its label fingerprint.
    ///
    /// Batches are sorted by this key so downstream deduplication and
    /// diffing see a deterministic order.
    pub fn sort_key(&self) -> (String, String) {
        (self.name.clone(), label_fingerprint(&self.labels))
    }
}

/// Deterministic serialization of a label map: `k1=v1,k2=v2` with keys in
/// ascending lexical order. Empty labels fingerprint to the empty string.
pub fn label_fingerprint(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Check a metric identifier against the Prometheus name grammar
/// `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_wire_serialization_shape() {
        let record = MetricRecord {
            name: "node_load1".to_string(),
            labels: labels(&[("vm_id", "abc"), ("env", "prod")]),
            value: 0.5,
            timestamp: 1_700_000_000_000,
            record_type: RecordType::Gauge,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "node_load1");
        assert_eq!(json["labels"]["vm_id"], "abc");
        assert_eq!(json["labels"]["env"], "prod");
        assert_eq!(json["value"], 0.5);
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(json["type"], "gauge");
    }

    #[test]
    fn test_labels_serialize_in_key_order() {
        let record = MetricRecord {
            name: "m".to_string(),
            labels: labels(&[("zebra", "1"), ("alpha", "2"), ("mid", "3")]),
            value: 1.0,
            timestamp: 1,
            record_type: RecordType::Counter,
        };

        let json = serde_json::to_string(&record).unwrap();
        let alpha = json.find("alpha").unwrap();
        let mid = json.find("mid").unwrap();
        let zebra = json.find("zebra").unwrap();
        assert!(alpha < mid && mid < zebra);
    }

    #[test]
    fn test_round_trip() {
        let record = MetricRecord {
            name: "node_cpu_seconds_total".to_string(),
            labels: labels(&[("mode", "idle")]),
            value: 900.0,
            timestamp: 1_700_000_000_000,
            record_type: RecordType::Counter,
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: MetricRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_label_fingerprint_sorted() {
        let fp = label_fingerprint(&labels(&[("b", "2"), ("a", "1"), ("c", "3")]));
        assert_eq!(fp, "a=1,b=2,c=3");
    }

    #[test]
    fn test_label_fingerprint_empty() {
        assert_eq!(label_fingerprint(&BTreeMap::new()), "");
    }

    #[test]
    fn test_valid_metric_names() {
        assert!(is_valid_metric_name("node_cpu_seconds_total"));
        assert!(is_valid_metric_name("node_memory_MemTotal_bytes"));
        assert!(is_valid_metric_name("_leading_underscore"));
        assert!(is_valid_metric_name("ns:subsystem:metric"));
    }

    #[test]
    fn test_invalid_metric_names() {
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("9leading_digit"));
        assert!(!is_valid_metric_name("has-dash"));
        assert!(!is_valid_metric_name("has space"));
    }
}
