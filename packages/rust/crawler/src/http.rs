//! HTTP fetch collaborator.
//!
//! Every request carries the browser-identifying header set from
//! [`FetchConfig`]; the lazy-load endpoint rejects default agents.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tracing::debug;
use url::Url;

use sso_shared::{FetchConfig, Result, SsoError};

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Shared HTTP client plus an in-flight request counter.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    base_url: Url,
    in_flight: Arc<AtomicUsize>,
}

impl Fetcher {
    /// Build a fetcher with the configured headers and timeout.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let accept = HeaderValue::from_str(&config.accept)
            .map_err(|e| SsoError::config(format!("invalid Accept header: {e}")))?;
        headers.insert(ACCEPT, accept);

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| SsoError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Requests currently awaiting a response, across all clones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// GET `url`. Any HTTP status is `Ok`; only transport failures are errors.
    pub async fn get(&self, url: &Url) -> Result<FetchResponse> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = self.send(url).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        result
    }

    /// GET a page, treating any non-2xx status as a fetch error.
    pub async fn get_page(&self, url: &Url) -> Result<String> {
        let response = self.get(url).await?;
        if !response.is_success() {
            return Err(SsoError::status(url.as_str(), response.status));
        }
        Ok(response.body)
    }

    async fn send(&self, url: &Url) -> Result<FetchResponse> {
        debug!(%url, "GET");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| SsoError::fetch(url.as_str(), e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SsoError::fetch(url.as_str(), format!("body read failed: {e}")))?;

        debug!(%url, status, bytes = body.len(), "response");

        Ok(FetchResponse {
            url: url.clone(),
            status,
            body,
        })
    }
}
