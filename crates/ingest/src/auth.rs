//! Auth manager
//!
//! Holds the bearer token bound to the VM identity and keeps it fresh on a
//! background cadence equal to the token lifetime. Token and base-URL
//! accessors are synchronous and never block or fetch; the pipeline reads
//! them at the start of every tick.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::metadata::MetadataClient;
use crate::AuthError;

pub struct AuthManager {
    client: Arc<MetadataClient>,
    vm_id: String,
    max_retries: u32,
    retry_delay: Duration,
    refresh_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AuthManager {
    pub fn new(
        client: Arc<MetadataClient>,
        vm_id: impl Into<String>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            vm_id: vm_id.into(),
            max_retries,
            retry_delay,
            refresh_handle: Mutex::new(None),
        }
    }

    /// Fetch a token if none is cached or the cached one expired.
    pub async fn ensure_valid_token(&self, cancel: &CancellationToken) -> Result<(), AuthError> {
        self.client
            .get_auth_token_with_retry(&self.vm_id, self.max_retries, self.retry_delay, cancel)
            .await?;
        debug!("Auth token ensured");
        Ok(())
    }

    /// The cached token, or empty if none has been obtained.
    /// Never blocks, never fetches.
    pub fn current_token(&self) -> String {
        self.client.cached_token()
    }

    /// The service base URL from the last successful fetch.
    pub fn service_base_url(&self) -> String {
        self.client.service_base_url()
    }

    /// Launch the background refresh cadence. Each period the cache is
    /// invalidated and re-fetched; the old token keeps serving readers
    /// until the new fetch lands. Stops on cancellation or [`close`].
    ///
    /// [`close`]: AuthManager::close
    pub fn start_refresh(&self, cancel: CancellationToken) {
        let client = self.client.clone();
        let vm_id = self.vm_id.clone();
        let max_retries = self.max_retries;
        let retry_delay = self.retry_delay;
        let period = client.token_lifetime();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; the eager startup fetch
            // already happened, so consume it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Refreshing auth token");
                        client.invalidate();
                        if let Err(error) = client
                            .get_auth_token_with_retry(&vm_id, max_retries, retry_delay, &cancel)
                            .await
                        {
                            error!(%error, "Background token refresh failed");
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("Token refresh stopped");
                        return;
                    }
                }
            }
        });

        *self.refresh_handle.lock().expect("refresh handle poisoned") = Some(handle);
    }

    /// Stop the refresh cadence and clear the cached token.
    pub fn close(&self) {
        if let Some(handle) = self
            .refresh_handle
            .lock()
            .expect("refresh handle poisoned")
            .take()
        {
            handle.abort();
        }
        self.client.invalidate();
    }
}

impl Drop for AuthManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .refresh_handle
            .lock()
            .expect("refresh handle poisoned")
            .take()
        {
            handle.abort();
        }
    }
}
