//! HTTP clients for the SC metrics agent
//!
//! Two remote surfaces live here: the metadata service that issues the
//! bearer token bound to the VM identity (and the service base URL used to
//! build downstream endpoints), and the timeseries ingestor that receives
//! snappy-compressed metric batches, diagnostics and heartbeats.

pub mod auth;
pub mod client;
pub mod metadata;

pub use auth::AuthManager;
pub use client::{
    DiagnosticPayload, HeartbeatRequest, IngestClient, IngestClientConfig, IngestResponse,
};
pub use metadata::{MetadataClient, TokenResponse};

use thiserror::Error;

/// Errors from the metadata / auth path.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("failed to fetch auth token: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metadata service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("received empty token from metadata service")]
    EmptyToken,

    #[error("auth token request cancelled")]
    Cancelled,

    #[error("failed to fetch auth token after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AuthError>,
    },
}

/// Errors from the ingestor write path.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("no metrics to send")]
    EmptyBatch,

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to compress payload: {0}")]
    Compress(#[from] snap::Error),

    #[error("service base URL not available from metadata")]
    MissingBaseUrl,

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ingestor returned status {status}: {body}")]
    Terminal { status: u16, body: String },

    #[error("request failed after {attempts} attempts, last status: {status}")]
    RetriesExhausted {
        attempts: u32,
        status: u16,
        body: String,
    },

    #[error("request cancelled")]
    Cancelled,
}
