//! Metric processing pipeline for the SC metrics agent
//!
//! Implements the three middle stages of the agent dataflow and the
//! driver that sequences them: [`decorator`] injects identity and
//! operator labels, [`aggregator`] flattens families into sorted wire
//! records, and [`pipeline`] runs Collect -> Decorate -> Aggregate ->
//! Write once per tick.

pub mod aggregator;
pub mod decorator;
pub mod pipeline;

pub use aggregator::{aggregate, batch_records, sort_records, AggregateError, DEFAULT_BATCH_SIZE};
pub use decorator::{Decorator, VM_ID_LABEL};
pub use pipeline::{Pipeline, PipelineError, ProcessingStats};
