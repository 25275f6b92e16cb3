//! Candidate records: freshly parsed, not yet reconciled researcher entries

use serde::{Deserialize, Serialize};

use crate::utils::text;

/// Field-level text fragments pulled out of one directory entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    /// Position within the extraction output (stable across stages)
    pub index: usize,
    /// Source page (0-based) the fragment block came from
    pub page: usize,
    pub name: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    /// Raw href, resolved against `source_url` during normalization
    pub profile_url: Option<String>,
    pub research_areas: Vec<String>,
    /// Page the block was extracted from
    pub source_url: Option<String>,
}

impl RawCandidate {
    /// True when no selector produced any text for this block
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.title.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.location.is_none()
            && self.profile_url.is_none()
            && self.research_areas.is_empty()
    }
}

/// A normalized researcher entry ready for reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub full_name: String,
    pub title: Option<String>,
    pub affiliation: String,
    pub sub_unit: Option<String>,
    /// Lowercased primary contact identifier
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub profile_url: Option<String>,
    pub research_areas: Vec<String>,
    /// Directory page the entry was scraped from
    pub source_url: Option<String>,
}

impl CandidateRecord {
    /// Case-folded, whitespace-collapsed full name used for composite matching
    pub fn full_name_key(&self) -> String {
        text::name_key(&self.full_name)
    }

    /// Domain part of the contact identifier
    pub fn email_domain(&self) -> Option<&str> {
        self.email.as_deref().and_then(text::email_domain)
    }

    /// Key used to detect the same logical person twice within one batch
    pub fn identity_key(&self) -> (String, String) {
        (self.full_name_key(), self.affiliation.clone())
    }
}
