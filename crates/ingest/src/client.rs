//! Timeseries ingest client
//!
//! Serializes metric batches to JSON, compresses them with the snappy
//! block format and POSTs them to the ingestor with bounded retries.
//! Diagnostics use the same endpoint with a different content type;
//! heartbeats are plain JSON and never retried here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sc_agent_types::MetricRecord;

use crate::auth::AuthManager;
use crate::IngestError;

pub const CONTENT_TYPE_TIMESERIES_BINARY: &str = "application/timeseries-binary-0";
pub const CONTENT_TYPE_DIAGNOSTICS_BINARY: &str = "application/diagnostics-binary-0";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_ENCODING_SNAPPY: &str = "snappy";

pub const INGEST_PATH: &str = "/resource-manager/api/v1/metrics/ingest";
pub const HEARTBEAT_PATH: &str = "/resource-manager/api/v1/compute/agent/heartbeat";

pub const AGENT_TYPE: &str = "SC_METRICS_AGENT";

/// Status codes that trigger another attempt. Everything else non-2xx is
/// terminal.
const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Agent health payload sent on the diagnostics path.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticPayload {
    pub agent_id: String,
    pub timestamp: i64,
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    pub metrics_count: usize,
    pub collector_status: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Heartbeat payload, field names fixed by the resource manager.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub agent_type: String,
    pub event_time: String,
    pub version: String,
}

/// One response as read off the wire.
#[derive(Debug)]
struct RawResponse {
    status: u16,
    body: String,
    retry_after: Option<Duration>,
}

/// Final response of a send, after retries.
#[derive(Debug)]
pub struct IngestResponse {
    pub status: u16,
    pub body: String,
    pub attempts: u32,
}

impl IngestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct IngestClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub version: String,
}

impl Default for IngestClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            version: "dev".to_string(),
        }
    }
}

/// HTTP client for the timeseries ingestor.
pub struct IngestClient {
    http: reqwest::Client,
    auth: Arc<AuthManager>,
    max_retries: u32,
    retry_delay: Duration,
    version: String,
}

impl IngestClient {
    pub fn new(config: IngestClientConfig, auth: Arc<AuthManager>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(format!("sc-metrics-agent/{}", config.version))
            .build()?;

        Ok(Self {
            http,
            auth,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            version: config.version,
        })
    }

    /// Send a sorted batch of metric records. The body is the JSON array
    /// of records compressed with the snappy block format.
    pub async fn send_metrics(
        &self,
        records: &[MetricRecord],
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestResponse, IngestError> {
        if records.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let payload = serde_json::to_vec(records)?;
        let compressed = snap::raw::Encoder::new().compress_vec(&payload)?;
        debug!(
            metrics_count = records.len(),
            payload_size = payload.len(),
            compressed_size = compressed.len(),
            "Sending metrics batch"
        );

        let endpoint = self.ingest_endpoint()?;
        let response = self
            .send_with_retry(
                compressed,
                CONTENT_TYPE_TIMESERIES_BINARY,
                token,
                &endpoint,
                cancel,
            )
            .await?;

        self.check_response(response, records.len())
    }

    /// Send an agent health payload on the diagnostics path. Compressed
    /// and retried exactly like metrics.
    pub async fn send_diagnostics(
        &self,
        diagnostics: &DiagnosticPayload,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestResponse, IngestError> {
        let payload = serde_json::to_vec(diagnostics)?;
        let compressed = snap::raw::Encoder::new().compress_vec(&payload)?;
        debug!(
            agent_id = %diagnostics.agent_id,
            status = %diagnostics.status,
            "Sending diagnostics"
        );

        let endpoint = self.ingest_endpoint()?;
        let response = self
            .send_with_retry(
                compressed,
                CONTENT_TYPE_DIAGNOSTICS_BINARY,
                token,
                &endpoint,
                cancel,
            )
            .await?;

        self.check_response(response, 0)
    }

    /// Send a heartbeat. Plain JSON, not compressed, a single attempt:
    /// the driver retries at tick granularity.
    pub async fn send_heartbeat(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestResponse, IngestError> {
        let base_url = self.auth.service_base_url();
        if base_url.is_empty() {
            return Err(IngestError::MissingBaseUrl);
        }
        let endpoint = format!("{base_url}{HEARTBEAT_PATH}");

        let payload = HeartbeatRequest {
            agent_type: AGENT_TYPE.to_string(),
            event_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            version: self.version.clone(),
        };
        let body = serde_json::to_vec(&payload)?;

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        debug!(endpoint = %endpoint, "Sending heartbeat");
        let raw = self
            .send_request(body, CONTENT_TYPE_JSON, token, &endpoint)
            .await?;

        self.check_response(
            IngestResponse {
                status: raw.status,
                body: raw.body,
                attempts: 1,
            },
            0,
        )
    }

    /// Resolve the ingest endpoint from the auth manager's base URL.
    fn ingest_endpoint(&self) -> Result<String, IngestError> {
        let base_url = self.auth.service_base_url();
        if base_url.is_empty() {
            return Err(IngestError::MissingBaseUrl);
        }
        Ok(format!("{base_url}{INGEST_PATH}"))
    }

    /// Turn a final response into success or a terminal error. Per-record
    /// errors the ingestor reports on 2xx are logged, never retried.
    fn check_response(
        &self,
        response: IngestResponse,
        metrics_count: usize,
    ) -> Result<IngestResponse, IngestError> {
        if response.is_success() {
            log_body_errors(&response.body);
            info!(
                status = response.status,
                attempts = response.attempts,
                metrics_count,
                "Request accepted by ingestor"
            );
            return Ok(response);
        }

        if response.attempts > 1 {
            Err(IngestError::RetriesExhausted {
                attempts: response.attempts,
                status: response.status,
                body: response.body,
            })
        } else {
            Err(IngestError::Terminal {
                status: response.status,
                body: response.body,
            })
        }
    }

    /// POST `data` with bounded retries. Retries on connection errors and
    /// on the retryable status set; waits the remote's `Retry-After` when
    /// present, else the configured base delay. Every wait honors
    /// cancellation.
    async fn send_with_retry(
        &self,
        data: Vec<u8>,
        content_type: &str,
        token: &str,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestResponse, IngestError> {
        let mut last_response: Option<RawResponse> = None;
        let mut last_transport_error: Option<reqwest::Error> = None;
        let mut attempts = 0;

        for attempt in 0..=self.max_retries {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            if attempt > 0 {
                let wait = last_response
                    .as_ref()
                    .and_then(|r| r.retry_after)
                    .unwrap_or(self.retry_delay);
                info!(attempt, wait_secs = wait.as_secs_f64(), "Retrying request");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                }
            }

            attempts = attempt + 1;
            match self
                .send_request(data.clone(), content_type, token, endpoint)
                .await
            {
                Ok(raw) => {
                    if should_retry(raw.status) {
                        warn!(
                            status = raw.status,
                            attempt, "Request failed with retryable status"
                        );
                        last_response = Some(raw);
                        continue;
                    }
                    return Ok(IngestResponse {
                        status: raw.status,
                        body: raw.body,
                        attempts,
                    });
                }
                Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
                Err(IngestError::Transport(error)) => {
                    warn!(%error, attempt, "Request failed");
                    last_transport_error = Some(error);
                }
                Err(other) => return Err(other),
            }
        }

        match (last_response, last_transport_error) {
            (Some(raw), _) => Ok(IngestResponse {
                status: raw.status,
                body: raw.body,
                attempts,
            }),
            (None, Some(error)) => Err(IngestError::Transport(error)),
            (None, None) => Err(IngestError::Cancelled),
        }
    }

    /// One POST; the body is fully read before returning. An in-flight
    /// request is never aborted by cancellation, only bounded by the
    /// client timeout; shutdown checks happen between attempts.
    async fn send_request(
        &self,
        data: Vec<u8>,
        content_type: &str,
        token: &str,
        endpoint: &str,
    ) -> Result<RawResponse, IngestError> {
        let mut request = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);

        // JSON bodies go uncompressed; everything else carries snappy.
        if content_type != CONTENT_TYPE_JSON {
            request = request.header(reqwest::header::CONTENT_ENCODING, CONTENT_ENCODING_SNAPPY);
        }
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await?;

        debug!(status, response_size = body.len(), "Received HTTP response");
        Ok(RawResponse {
            status,
            body,
            retry_after,
        })
    }

    /// Release pooled connections. Idle connections are dropped with the
    /// client; nothing else is held.
    pub fn close(&self) {}
}

/// Parse a `Retry-After` value: integer delta-seconds or an HTTP-date.
/// Unparsable or past values yield `None` (the base delay applies).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<u64>() {
        if seconds > 0 {
            return Some(Duration::from_secs(seconds));
        }
        return None;
    }

    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.signed_duration_since(Utc::now());
    delta.to_std().ok().filter(|d| !d.is_zero())
}

/// Log per-record errors the ingestor reports in an otherwise-successful
/// response body.
fn log_body_errors(body: &str) {
    if body.is_empty() {
        return;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return;
    };
    let errors = value
        .get("errors")
        .or_else(|| value.get("data").and_then(|d| d.get("errors")));
    if let Some(errors) = errors.and_then(|e| e.as_array()) {
        if !errors.is_empty() {
            warn!(
                error_count = errors.len(),
                errors = %serde_json::Value::Array(errors.clone()),
                "Ingestor reported per-record errors"
            );
        }
    }
}

fn should_retry(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for status in [429, 500, 502, 503, 504] {
            assert!(should_retry(status), "{status} should be retryable");
        }
        for status in [200, 202, 400, 401, 403, 404, 422] {
            assert!(!should_retry(status), "{status} should be terminal");
        }
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after("0"), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let future = Utc::now() + chrono::Duration::seconds(30);
        let value = future.to_rfc2822();
        let parsed = parse_retry_after(&value).unwrap();
        assert!(parsed <= Duration::from_secs(30));
        assert!(parsed >= Duration::from_secs(25));
    }

    #[test]
    fn test_parse_retry_after_past_or_garbage() {
        let past = Utc::now() - chrono::Duration::seconds(30);
        assert_eq!(parse_retry_after(&past.to_rfc2822()), None);
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_snappy_round_trip() {
        let payload =
            br#"[{"name":"node_load1","labels":{},"value":0.5,"timestamp":1,"type":"gauge"}]"#;
        let compressed = snap::raw::Encoder::new().compress_vec(payload).unwrap();
        let decompressed = snap::raw::Decoder::new()
            .decompress_vec(&compressed)
            .unwrap();
        assert_eq!(decompressed, payload);
        // Block format, not framed: no stream identifier chunk.
        assert_ne!(&compressed[..4.min(compressed.len())], b"\xff\x06\x00\x00");
    }

    #[test]
    fn test_diagnostic_payload_shape() {
        let payload = DiagnosticPayload {
            agent_id: "vm-1".to_string(),
            timestamp: 1_700_000_000_000,
            status: "error".to_string(),
            last_error: "write failed".to_string(),
            metrics_count: 12,
            collector_status: BTreeMap::from([("cpu".to_string(), true)]),
            metadata: BTreeMap::from([("version".to_string(), "1.2.0".to_string())]),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["agent_id"], "vm-1");
        assert_eq!(json["status"], "error");
        assert_eq!(json["last_error"], "write failed");
        assert_eq!(json["metrics_count"], 12);
        assert_eq!(json["collector_status"]["cpu"], true);
    }

    #[test]
    fn test_diagnostic_payload_omits_empty_error() {
        let payload = DiagnosticPayload {
            agent_id: "vm-1".to_string(),
            timestamp: 1,
            status: "healthy".to_string(),
            last_error: String::new(),
            metrics_count: 0,
            collector_status: BTreeMap::new(),
            metadata: BTreeMap::new(),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("last_error").is_none());
    }

    #[test]
    fn test_heartbeat_field_names_are_camel_case() {
        let payload = HeartbeatRequest {
            agent_type: AGENT_TYPE.to_string(),
            event_time: "2026-01-01T00:00:00Z".to_string(),
            version: "1.2.0".to_string(),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["agentType"], "SC_METRICS_AGENT");
        assert_eq!(json["eventTime"], "2026-01-01T00:00:00Z");
        assert_eq!(json["version"], "1.2.0");
    }
}
