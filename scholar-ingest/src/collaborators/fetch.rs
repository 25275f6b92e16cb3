//! Page fetchers: rate-limited HTTP and recorded replay

use async_trait::async_trait;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{sha256_hex, ContentFetcher, FetchedContent};
use crate::error::CollaboratorError;

/// Static HTTP fetcher with a process-wide request rate limit
pub struct HttpFetcher {
    client: reqwest::Client,
    rate_limiter: governor::DefaultDirectRateLimiter,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::NotConfigured(format!("HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = governor::RateLimiter::direct(governor::Quota::per_second(per_second));

        Ok(Self {
            client,
            rate_limiter,
        })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, CollaboratorError> {
        self.rate_limiter.until_ready().await;

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Status(status.as_u16(), url.to_string()));
        }

        let final_url = response.url().to_string();
        let markup = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(url, bytes = markup.len(), elapsed_ms, "Fetched page");

        Ok(FetchedContent {
            url: final_url,
            digest: sha256_hex(markup.as_bytes()),
            markup,
            status: status.as_u16(),
            elapsed_ms,
        })
    }
}

/// Serves pages captured by an earlier run instead of touching the network
#[derive(Debug, Clone, Default)]
pub struct RecordedFetcher {
    pages: HashMap<String, FetchedContent>,
}

impl RecordedFetcher {
    /// Build from (requested URL, captured content) pairs
    pub fn from_pages(pages: impl IntoIterator<Item = (String, FetchedContent)>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[async_trait]
impl ContentFetcher for RecordedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, CollaboratorError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("no recorded page for {}", url)))
    }
}
