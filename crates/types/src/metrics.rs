//! Collector-side metric model
//!
//! Collectors emit [`MetricFamily`] values: a named, typed group of
//! [`Sample`]s. Families flow through decoration and are flattened into
//! wire records by the aggregator; they are never retained across ticks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of a metric family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Monotonically non-decreasing since process start (modulo kernel
    /// counter wrap).
    Counter,
    /// Arbitrary instantaneous value.
    Gauge,
    /// Cumulative bucket counts plus total count and sum.
    Histogram,
    /// Quantile points plus total count and sum.
    Summary,
    /// Value with no declared semantics.
    Untyped,
}

impl MetricKind {
    /// Kind name as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
            Self::Untyped => "untyped",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One cumulative histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Inclusive upper bound of the bucket.
    pub upper_bound: f64,
    /// Number of observations with value <= `upper_bound`.
    pub cumulative_count: u64,
}

/// One summary quantile point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantilePoint {
    /// Quantile in [0, 1].
    pub quantile: f64,
    /// Observed value at that quantile.
    pub value: f64,
}

/// Numeric payload of a sample, one variant per metric kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Histogram {
        buckets: Vec<HistogramBucket>,
        sample_count: u64,
        sample_sum: f64,
    },
    Summary {
        quantiles: Vec<QuantilePoint>,
        sample_count: u64,
        sample_sum: f64,
    },
}

impl MetricValue {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Untyped(_) => MetricKind::Untyped,
            Self::Histogram { .. } => MetricKind::Histogram,
            Self::Summary { .. } => MetricKind::Summary,
        }
    }
}

/// A single time-series point within a family.
///
/// Label keys are unique (map semantics) and iterate in sorted order, which
/// keeps serialization deterministic. Two samples in the same family must
/// differ in at least one label pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Label pairs attached to this sample.
    pub labels: BTreeMap<String, String>,
    /// Numeric payload; its shape must match the family kind.
    pub value: MetricValue,
    /// Optional explicit timestamp in milliseconds since the Unix epoch.
    /// When absent, the aggregator stamps the pipeline tick instant.
    pub timestamp_ms: Option<i64>,
}

impl Sample {
    /// Create a sample with no labels and no explicit timestamp.
    pub fn new(value: MetricValue) -> Self {
        Self {
            labels: BTreeMap::new(),
            value,
            timestamp_ms: None,
        }
    }

    /// Add a label pair.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set an explicit timestamp.
    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }
}

/// The collector output unit: a named, typed, documented group of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    /// Family name, a valid metric identifier.
    pub name: String,
    /// Kind shared by every sample in the family.
    pub kind: MetricKind,
    /// Human-readable documentation string.
    pub help: String,
    /// Ordered samples.
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    /// Create an empty family.
    pub fn new(name: impl Into<String>, kind: MetricKind, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            help: help.into(),
            samples: Vec::new(),
        }
    }

    /// Add a sample.
    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }

    /// Convenience for the common single-gauge family shape.
    pub fn gauge(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, help).with_sample(Sample::new(MetricValue::Gauge(value)))
    }
}
