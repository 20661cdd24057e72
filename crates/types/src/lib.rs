//! Core types and data models for the SC metrics agent
//!
//! This crate provides the fundamental metric structures shared by the
//! collector, processor and ingest crates: the collector-side
//! [`MetricFamily`]/[`Sample`] model and the flattened wire-side
//! [`MetricRecord`].

pub mod metrics;
pub mod record;

pub use metrics::{HistogramBucket, MetricFamily, MetricKind, MetricValue, QuantilePoint, Sample};
pub use record::{is_valid_metric_name, label_fingerprint, MetricRecord, RecordType};
