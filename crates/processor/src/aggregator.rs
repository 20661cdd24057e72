//! Metric aggregation
//!
//! Flattens decorated metric families into the linear wire-record stream:
//! one record per counter/gauge/untyped sample, and the standard
//! `_bucket`/`_count`/`_sum` expansion for histograms and summaries.
//! Records are then sorted by `(name, label fingerprint)` and split into
//! batches.

use sc_agent_types::{MetricFamily, MetricKind, MetricRecord, MetricValue, RecordType};
use thiserror::Error;
use tracing::debug;

/// Default number of records per write batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error(
        "family {family} has kind {family_kind} but a sample carries a {sample_kind} payload"
    )]
    KindMismatch {
        family: String,
        family_kind: MetricKind,
        sample_kind: MetricKind,
    },
}

/// Flatten families into wire records. Samples carrying their own
/// timestamp keep it; untimed samples are stamped with `tick_ms` so one
/// batch shares a single tick instant.
pub fn aggregate(
    families: &[MetricFamily],
    tick_ms: i64,
) -> Result<Vec<MetricRecord>, AggregateError> {
    let mut records = Vec::new();

    for family in families {
        for sample in &family.samples {
            if sample.value.kind() != family.kind {
                return Err(AggregateError::KindMismatch {
                    family: family.name.clone(),
                    family_kind: family.kind,
                    sample_kind: sample.value.kind(),
                });
            }

            let timestamp = sample.timestamp_ms.unwrap_or(tick_ms);
            flatten_sample(family, sample, timestamp, &mut records);
        }
    }

    debug!(records = records.len(), "Aggregation completed");
    Ok(records)
}

fn flatten_sample(
    family: &MetricFamily,
    sample: &sc_agent_types::Sample,
    timestamp: i64,
    records: &mut Vec<MetricRecord>,
) {
    let record = |name: String, labels, value, record_type| MetricRecord {
        name,
        labels,
        value,
        timestamp,
        record_type,
    };

    match &sample.value {
        MetricValue::Counter(value) => {
            records.push(record(
                family.name.clone(),
                sample.labels.clone(),
                *value,
                RecordType::Counter,
            ));
        }
        MetricValue::Gauge(value) => {
            records.push(record(
                family.name.clone(),
                sample.labels.clone(),
                *value,
                RecordType::Gauge,
            ));
        }
        MetricValue::Untyped(value) => {
            records.push(record(
                family.name.clone(),
                sample.labels.clone(),
                *value,
                RecordType::Untyped,
            ));
        }
        MetricValue::Histogram {
            buckets,
            sample_count,
            sample_sum,
        } => {
            for bucket in buckets {
                let mut labels = sample.labels.clone();
                labels.insert("le".to_string(), format_bound(bucket.upper_bound));
                records.push(record(
                    format!("{}_bucket", family.name),
                    labels,
                    bucket.cumulative_count as f64,
                    RecordType::Counter,
                ));
            }
            records.push(record(
                format!("{}_count", family.name),
                sample.labels.clone(),
                *sample_count as f64,
                RecordType::Counter,
            ));
            records.push(record(
                format!("{}_sum", family.name),
                sample.labels.clone(),
                *sample_sum,
                RecordType::Counter,
            ));
        }
        MetricValue::Summary {
            quantiles,
            sample_count,
            sample_sum,
        } => {
            for point in quantiles {
                let mut labels = sample.labels.clone();
                labels.insert("quantile".to_string(), format_bound(point.quantile));
                records.push(record(
                    family.name.clone(),
                    labels,
                    point.value,
                    RecordType::Gauge,
                ));
            }
            records.push(record(
                format!("{}_count", family.name),
                sample.labels.clone(),
                *sample_count as f64,
                RecordType::Counter,
            ));
            records.push(record(
                format!("{}_sum", family.name),
                sample.labels.clone(),
                *sample_sum,
                RecordType::Counter,
            ));
        }
    }
}

/// Format a bucket bound or quantile the way Prometheus text output does:
/// shortest decimal form, with infinities spelled `+Inf`/`-Inf`.
fn format_bound(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else {
        format!("{value}")
    }
}

/// Sort records by `(name, label fingerprint)` ascending, so downstream
/// deduplication and diffing are deterministic.
pub fn sort_records(records: &mut [MetricRecord]) {
    records.sort_by_cached_key(|record| record.sort_key());
}

/// Split records into batches of at most `batch_size`, preserving order.
pub fn batch_records(records: Vec<MetricRecord>, batch_size: usize) -> Vec<Vec<MetricRecord>> {
    if records.is_empty() {
        return Vec::new();
    }
    let batch_size = if batch_size == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        batch_size
    };

    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut records = records;
    while records.len() > batch_size {
        let rest = records.split_off(batch_size);
        batches.push(records);
        records = rest;
    }
    batches.push(records);
    batches
}
