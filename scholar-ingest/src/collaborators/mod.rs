//! External collaborator capabilities
//!
//! Fetching, dynamic rendering and deep research are injected into the
//! orchestrator as trait objects. Each has an HTTP-backed production
//! implementation, a mock, and (for fetching) a recorded-replay variant.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CollaboratorError;
use crate::models::{DynamicLoad, EnrichedDataBundle, ResearcherSummary, SourceError};

pub mod fetch;
pub mod mock;
pub mod render;
pub mod research;

pub use fetch::{HttpFetcher, RecordedFetcher};
pub use mock::{MockFetcher, MockRenderer, MockResearchSource};
pub use render::{HttpRenderClient, StaticRenderer};
pub use research::{HttpResearchSource, ResearchAggregator};

/// One fetched page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedContent {
    /// Final URL after redirects
    pub url: String,
    pub markup: String,
    pub status: u16,
    pub elapsed_ms: u64,
    /// SHA-256 of the markup, hex encoded
    pub digest: String,
}

/// Page retrieval capability
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, CollaboratorError>;
}

/// Markup after dynamic-load interactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedContent {
    pub markup: String,
    pub interactions: u32,
}

/// Dynamic-content resolution capability
#[async_trait]
pub trait DynamicRenderer: Send + Sync {
    /// Resolve `markup` (fetched from `url`) by performing `directive`.
    /// `None` asks for a plain script-executing render.
    async fn resolve(
        &self,
        url: &str,
        markup: &str,
        directive: Option<&DynamicLoad>,
    ) -> Result<RenderedContent, CollaboratorError>;
}

/// A single secondary research source
#[async_trait]
pub trait ResearchSource: Send + Sync {
    /// Source identifier (e.g. "openalex")
    fn name(&self) -> &str;

    async fn query(
        &self,
        researcher: &ResearcherSummary,
    ) -> Result<EnrichedDataBundle, CollaboratorError>;
}

/// Bundle plus the errors of the sources that failed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub bundle: EnrichedDataBundle,
    pub errors: Vec<SourceError>,
}

impl ResearchOutcome {
    /// True when every requested source failed
    pub fn all_failed(&self) -> bool {
        self.bundle.sources.is_empty() && !self.errors.is_empty()
    }
}

/// Deep research over a list of named sources
///
/// Never fails as a whole: source failures become `errors`, and total
/// failure yields an empty bundle.
#[async_trait]
pub trait DeepResearch: Send + Sync {
    async fn research(&self, researcher: &ResearcherSummary, sources: &[String]) -> ResearchOutcome;
}

/// The collaborator set handed to the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub renderer: Arc<dyn DynamicRenderer>,
    pub research: Arc<dyn DeepResearch>,
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(bytes))
}
