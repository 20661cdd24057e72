//! Metadata service client
//!
//! Fetches the bearer token bound to the VM identity, caching it together
//! with the service base URL for the token lifetime. Concurrent callers
//! are single-flighted through an async fetch lock; the cached values are
//! readable without blocking.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::AuthError;

/// How long a fetched token stays valid in the cache.
pub const TOKEN_CACHE_LIFETIME: Duration = Duration::from_secs(30 * 60);

const HEADER_RESOURCE_ID: &str = "X-Resource-ID";

/// Response from the metadata service.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub service_base_url: String,
}

#[derive(Default)]
struct TokenCache {
    token: String,
    service_base_url: String,
    expires_at: Option<Instant>,
}

impl TokenCache {
    fn is_valid(&self) -> bool {
        !self.token.is_empty()
            && self
                .expires_at
                .is_some_and(|expires_at| Instant::now() < expires_at)
    }
}

/// HTTP client for the metadata service with token caching.
pub struct MetadataClient {
    endpoint: String,
    http: reqwest::Client,
    cache: RwLock<TokenCache>,
    // Serializes fetches so only one request is in flight at a time.
    fetch_lock: tokio::sync::Mutex<()>,
    token_lifetime: Duration,
}

impl MetadataClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_token_lifetime(endpoint, timeout, TOKEN_CACHE_LIFETIME)
    }

    /// As [`MetadataClient::new`] with an explicit cache lifetime.
    pub fn with_token_lifetime(
        endpoint: impl Into<String>,
        timeout: Duration,
        token_lifetime: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            http,
            cache: RwLock::new(TokenCache::default()),
            fetch_lock: tokio::sync::Mutex::new(()),
            token_lifetime,
        })
    }

    /// The configured token lifetime; also the refresh cadence.
    pub fn token_lifetime(&self) -> Duration {
        self.token_lifetime
    }

    /// Return a cached token, fetching a new one if none is valid.
    pub async fn get_auth_token(&self, vm_id: &str) -> Result<String, AuthError> {
        {
            let cache = self.cache.read().expect("token cache poisoned");
            if cache.is_valid() {
                debug!("Using cached auth token");
                return Ok(cache.token.clone());
            }
        }

        let _guard = self.fetch_lock.lock().await;

        // Another caller may have fetched while we waited for the lock.
        {
            let cache = self.cache.read().expect("token cache poisoned");
            if cache.is_valid() {
                return Ok(cache.token.clone());
            }
        }

        let response = self.fetch_auth_token(vm_id).await?;

        let mut cache = self.cache.write().expect("token cache poisoned");
        cache.token = response.token.clone();
        cache.service_base_url = response.service_base_url;
        cache.expires_at = Some(Instant::now() + self.token_lifetime);
        info!(
            lifetime_secs = self.token_lifetime.as_secs(),
            "Fetched and cached new auth token"
        );

        Ok(response.token)
    }

    /// As [`MetadataClient::get_auth_token`] with retries on failure.
    pub async fn get_auth_token_with_retry(
        &self,
        vm_id: &str,
        max_retries: u32,
        retry_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, AuthError> {
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if cancel.is_cancelled() {
                return Err(AuthError::Cancelled);
            }

            if attempt > 0 {
                warn!(attempt, max_retries, "Retrying auth token request");
                tokio::select! {
                    _ = tokio::time::sleep(retry_delay) => {}
                    _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                }
            }

            match self.get_auth_token(vm_id).await {
                Ok(token) => return Ok(token),
                Err(AuthError::Cancelled) => return Err(AuthError::Cancelled),
                Err(error) => {
                    warn!(%error, attempt, "Auth token request failed");
                    last_error = Some(error);
                }
            }
        }

        Err(AuthError::RetriesExhausted {
            attempts: max_retries + 1,
            source: Box::new(last_error.unwrap_or(AuthError::EmptyToken)),
        })
    }

    /// One GET to the metadata endpoint. The request itself is bounded by
    /// the client timeout; cancellation is honored between attempts.
    async fn fetch_auth_token(&self, vm_id: &str) -> Result<TokenResponse, AuthError> {
        debug!(endpoint = %self.endpoint, "Fetching new auth token from metadata service");

        let response = self
            .http
            .get(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(HEADER_RESOURCE_ID, vm_id)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token_response: TokenResponse = response.json().await?;
        if token_response.token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        Ok(token_response)
    }

    /// Cached token, empty if none has been obtained. Never blocks.
    pub fn cached_token(&self) -> String {
        self.cache.read().expect("token cache poisoned").token.clone()
    }

    /// Base URL from the last successful fetch, empty if none.
    pub fn service_base_url(&self) -> String {
        self.cache
            .read()
            .expect("token cache poisoned")
            .service_base_url
            .clone()
    }

    /// Drop the cached token so the next fetch goes to the wire.
    pub fn invalidate(&self) {
        let mut cache = self.cache.write().expect("token cache poisoned");
        cache.token.clear();
        cache.service_base_url.clear();
        cache.expires_at = None;
        debug!("Token cache invalidated");
    }
}
