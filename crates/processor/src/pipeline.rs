//! Pipeline driver
//!
//! Runs the Collect -> Decorate -> Aggregate -> Write sequence once per
//! tick. A failed tick records the error and returns; the next tick starts
//! clean. Ticks are never concurrent: the caller drives [`Pipeline::process`]
//! from a single task.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use sc_agent_collector::CollectorRegistry;
use sc_agent_ingest::{AuthManager, DiagnosticPayload, IngestClient, IngestError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{self, AggregateError};
use crate::decorator::Decorator;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("auth token is empty - refresh may have failed")]
    AuthUnavailable,

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("failed to write metrics: {0}")]
    Write(#[from] IngestError),

    #[error("tick timed out after {0:?}")]
    Timeout(Duration),
}

/// Statistics about the last successful tick, read by the diagnostics
/// composer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessingStats {
    pub written_metrics: usize,
    pub processing_time: Duration,
    pub timestamp: i64,
}

#[derive(Default)]
struct PipelineState {
    last_metric_count: usize,
    last_processing_time: Duration,
    last_process_timestamp: i64,
    last_error: String,
}

pub struct Pipeline {
    registry: CollectorRegistry,
    decorator: Decorator,
    writer: IngestClient,
    auth: Arc<AuthManager>,
    version: String,
    batch_size: usize,
    state: Mutex<PipelineState>,
}

impl Pipeline {
    pub fn new(
        registry: CollectorRegistry,
        decorator: Decorator,
        writer: IngestClient,
        auth: Arc<AuthManager>,
        version: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            registry,
            decorator,
            writer,
            auth,
            version: version.into(),
            batch_size,
            state: Mutex::new(PipelineState::default()),
        }
    }

    /// Run one tick of the pipeline.
    pub async fn process(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let started = Instant::now();
        let result = self.process_inner(cancel, started).await;

        if let Err(ref error) = result {
            self.state.lock().expect("pipeline state poisoned").last_error = error.to_string();
        }
        result
    }

    /// As [`Pipeline::process`], bounded by `timeout`.
    pub async fn process_with_timeout(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), PipelineError> {
        match tokio::time::timeout(timeout, self.process(cancel)).await {
            Ok(result) => result,
            Err(_) => {
                let error = PipelineError::Timeout(timeout);
                self.state.lock().expect("pipeline state poisoned").last_error = error.to_string();
                Err(error)
            }
        }
    }

    async fn process_inner(
        &self,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<(), PipelineError> {
        let token = self.auth.current_token();
        if token.is_empty() {
            return Err(PipelineError::AuthUnavailable);
        }

        debug!("Starting metrics processing pipeline");

        let families = self.registry.gather();
        if families.is_empty() {
            info!("No metrics collected, skipping tick");
            return Ok(());
        }
        debug!(families = families.len(), "Metrics collected");

        let decorated = self.decorator.decorate(&families);

        let tick_ms = Utc::now().timestamp_millis();
        let mut records = aggregator::aggregate(&decorated, tick_ms)?;
        if records.is_empty() {
            warn!("No metrics after aggregation");
            return Ok(());
        }
        aggregator::sort_records(&mut records);

        let total = records.len();
        for batch in aggregator::batch_records(records, self.batch_size) {
            self.writer.send_metrics(&batch, &token, cancel).await?;
        }

        // Heartbeat failures are logged and retried at the next tick.
        if let Err(error) = self.writer.send_heartbeat(&token, cancel).await {
            warn!(%error, "Failed to send heartbeat");
        }

        let processing_time = started.elapsed();
        {
            let mut state = self.state.lock().expect("pipeline state poisoned");
            state.last_metric_count = total;
            state.last_processing_time = processing_time;
            state.last_process_timestamp = tick_ms;
            state.last_error.clear();
        }

        info!(
            collected_families = families.len(),
            written_metrics = total,
            processing_time_ms = processing_time.as_millis() as u64,
            "Pipeline tick completed"
        );
        Ok(())
    }

    /// Send agent health to the ingestor. Best-effort: failures are
    /// logged and dropped, never reported through another diagnostic.
    pub async fn write_diagnostics(&self, cancel: &CancellationToken) {
        let token = self.auth.current_token();
        let payload = self.compose_diagnostics();

        match self.writer.send_diagnostics(&payload, &token, cancel).await {
            Ok(_) => info!(status = %payload.status, "Diagnostics sent"),
            Err(error) => warn!(%error, "Failed to send diagnostics, dropping"),
        }
    }

    fn compose_diagnostics(&self) -> DiagnosticPayload {
        let state = self.state.lock().expect("pipeline state poisoned");
        let status = if state.last_error.is_empty() {
            "healthy"
        } else {
            "error"
        };

        DiagnosticPayload {
            agent_id: self.decorator.vm_id().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            status: status.to_string(),
            last_error: state.last_error.clone(),
            metrics_count: state.last_metric_count,
            collector_status: self.registry.enabled(),
            metadata: [("version".to_string(), self.version.clone())]
                .into_iter()
                .collect(),
        }
    }

    /// Stats from the last successful tick.
    pub fn stats(&self) -> ProcessingStats {
        let state = self.state.lock().expect("pipeline state poisoned");
        ProcessingStats {
            written_metrics: state.last_metric_count,
            processing_time: state.last_processing_time,
            timestamp: state.last_process_timestamp,
        }
    }

    /// The last tick error, empty after a clean tick.
    pub fn last_error(&self) -> String {
        self.state
            .lock()
            .expect("pipeline state poisoned")
            .last_error
            .clone()
    }

    /// Release the auth manager, the write client and the collectors.
    pub fn close(&self) {
        debug!("Closing pipeline");
        self.auth.close();
        self.writer.close();
        self.registry.close();
    }
}
