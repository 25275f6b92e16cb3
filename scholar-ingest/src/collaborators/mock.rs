//! In-memory collaborators for tests and dry runs

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    sha256_hex, ContentFetcher, DynamicRenderer, FetchedContent, RenderedContent, ResearchSource,
};
use crate::error::CollaboratorError;
use crate::models::{DynamicLoad, EnrichedDataBundle, ResearcherSummary};

/// Serves fixture markup by URL
#[derive(Debug, Default)]
pub struct MockFetcher {
    pages: HashMap<String, String>,
    failures: HashSet<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, markup: impl Into<String>) -> Self {
        self.pages.insert(url.into(), markup.into());
        self
    }

    /// Requests for `url` fail with a network error
    pub fn with_failure(mut self, url: impl Into<String>) -> Self {
        self.failures.insert(url.into());
        self
    }

    /// Sleep before answering, to hold jobs at a suspension point
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, CollaboratorError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.contains(url) {
            return Err(CollaboratorError::Network(format!("connection refused: {}", url)));
        }

        let markup = self
            .pages
            .get(url)
            .ok_or_else(|| CollaboratorError::Status(404, url.to_string()))?;

        Ok(FetchedContent {
            url: url.to_string(),
            markup: markup.clone(),
            status: 200,
            elapsed_ms: 0,
            digest: sha256_hex(markup.as_bytes()),
        })
    }
}

/// Renderer that appends fixed markup and reports a fixed interaction count
#[derive(Debug, Default)]
pub struct MockRenderer {
    appended: String,
    interactions: u32,
    fail: bool,
}

impl MockRenderer {
    pub fn new(appended: impl Into<String>, interactions: u32) -> Self {
        Self {
            appended: appended.into(),
            interactions,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl DynamicRenderer for MockRenderer {
    async fn resolve(
        &self,
        url: &str,
        markup: &str,
        _directive: Option<&DynamicLoad>,
    ) -> Result<RenderedContent, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Network(format!("render failed: {}", url)));
        }
        Ok(RenderedContent {
            markup: format!("{}{}", markup, self.appended),
            interactions: self.interactions,
        })
    }
}

/// Research source answering from fixtures keyed by full name
#[derive(Debug, Default)]
pub struct MockResearchSource {
    name: String,
    by_name: HashMap<String, EnrichedDataBundle>,
    default: Option<EnrichedDataBundle>,
    fail: bool,
}

impl MockResearchSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A source whose every query fails
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_result(mut self, full_name: impl Into<String>, bundle: EnrichedDataBundle) -> Self {
        self.by_name.insert(full_name.into(), bundle);
        self
    }

    /// Answer for researchers without a specific fixture
    pub fn with_default(mut self, bundle: EnrichedDataBundle) -> Self {
        self.default = Some(bundle);
        self
    }
}

#[async_trait]
impl ResearchSource for MockResearchSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        researcher: &ResearcherSummary,
    ) -> Result<EnrichedDataBundle, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Network(format!("{} unavailable", self.name)));
        }
        self.by_name
            .get(&researcher.full_name)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(researcher.full_name.clone()))
    }
}
