//! Enrichment data: research bundles, merge conflicts and partial updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::researcher::EnrichmentStatus;

/// A publication proposed by a research source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub title: String,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub authors: Vec<String>,
    pub citation_count: Option<i64>,
    /// DOI or source-specific identifier
    pub external_id: Option<String>,
    pub url: Option<String>,
}

/// Aggregate output of querying research sources for one researcher
///
/// An all-`None` bundle is valid: it is what total source failure produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichedDataBundle {
    pub h_index: Option<i64>,
    pub citation_count: Option<i64>,
    pub research_areas: Vec<String>,
    pub biography: Option<String>,
    pub homepage_url: Option<String>,
    pub scholar_profile_url: Option<String>,
    pub orcid: Option<String>,
    pub publications: Vec<Publication>,
    /// Sources that contributed data
    pub sources: Vec<String>,
}

impl EnrichedDataBundle {
    pub fn is_empty(&self) -> bool {
        self.h_index.is_none()
            && self.citation_count.is_none()
            && self.research_areas.is_empty()
            && self.biography.is_none()
            && self.homepage_url.is_none()
            && self.scholar_profile_url.is_none()
            && self.orcid.is_none()
            && self.publications.is_empty()
    }
}

/// How a field-level discrepancy was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepExisting,
    UseNew,
    Merge,
}

/// Audit entry for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub field: String,
    pub existing: Value,
    pub proposed: Value,
    pub resolution: Resolution,
}

/// Partial update produced by a merge; `None` fields are left untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearcherUpdate {
    pub id: Uuid,
    pub h_index: Option<i64>,
    pub citation_count: Option<i64>,
    pub research_areas: Option<Vec<String>>,
    pub biography: Option<String>,
    pub homepage_url: Option<String>,
    pub scholar_profile_url: Option<String>,
    pub orcid: Option<String>,
    pub enrichment_status: EnrichmentStatus,
    pub enrichment_confidence: f64,
    pub last_verified_at: DateTime<Utc>,
}

/// Result of merging one bundle into one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub update: ResearcherUpdate,
    pub publications_to_add: Vec<Publication>,
    pub conflicts: Vec<MergeConflict>,
    pub confidence: f64,
}
