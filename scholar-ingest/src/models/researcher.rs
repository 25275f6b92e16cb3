//! Canonical researcher records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::utils::text;

/// Enrichment lifecycle of a canonical record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for EnrichmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown enrichment status: {}", other)),
        }
    }
}

/// The durable researcher entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: Uuid,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub full_name: String,
    pub title: Option<String>,
    pub affiliation: String,
    pub sub_unit: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub profile_url: Option<String>,
    pub research_areas: Vec<String>,

    // Enrichment fields
    pub h_index: Option<i64>,
    pub citation_count: Option<i64>,
    pub biography: Option<String>,
    pub homepage_url: Option<String>,
    pub scholar_profile_url: Option<String>,
    pub orcid: Option<String>,
    pub enrichment_status: EnrichmentStatus,
    pub enrichment_confidence: Option<f64>,
    pub last_verified_at: Option<DateTime<Utc>>,

    pub directory_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalRecord {
    pub fn full_name_key(&self) -> String {
        text::name_key(&self.full_name)
    }

    pub fn email_domain(&self) -> Option<&str> {
        self.email.as_deref().and_then(text::email_domain)
    }
}

/// The subset of a record handed to deep research
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearcherSummary {
    pub id: Uuid,
    pub full_name: String,
    pub affiliation: String,
    pub sub_unit: Option<String>,
    pub email: Option<String>,
    pub profile_url: Option<String>,
    pub research_areas: Vec<String>,
}

impl From<&CanonicalRecord> for ResearcherSummary {
    fn from(record: &CanonicalRecord) -> Self {
        Self {
            id: record.id,
            full_name: record.full_name.clone(),
            affiliation: record.affiliation.clone(),
            sub_unit: record.sub_unit.clone(),
            email: record.email.clone(),
            profile_url: record.profile_url.clone(),
            research_areas: record.research_areas.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            EnrichmentStatus::Pending,
            EnrichmentStatus::InProgress,
            EnrichmentStatus::Complete,
            EnrichmentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<EnrichmentStatus>(), Ok(status));
        }
        assert!("bogus".parse::<EnrichmentStatus>().is_err());
    }
}
