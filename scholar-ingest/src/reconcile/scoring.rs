//! Composite-match confidence and change detection

use crate::models::{CanonicalRecord, CandidateRecord};
use crate::utils::text;

/// Minimum composite confidence for a match to be used
pub const USABLE_CONFIDENCE: f64 = 0.9;

const BASE: f64 = 0.5;
const TITLE_EXACT: f64 = 0.2;
const TITLE_PARTIAL: f64 = 0.1;
const EMAIL_DOMAIN: f64 = 0.15;
const PHONE_DIGITS: f64 = 0.10;
const LINK_HOST: f64 = 0.05;

/// Confidence that `candidate` and `record` (already equal on name and
/// affiliation) are the same person
///
/// **Algorithm:**
/// 1. Base 0.5
/// 2. Title: +0.2 when normalized titles are equal, +0.1 when one contains
///    the other
/// 3. +0.15 for the same email domain
/// 4. +0.10 for the same phone digits
/// 5. +0.05 for the same profile link host
/// 6. Cap at 1.0
///
/// Each signal only adds, so the score never drops as signals are added.
pub fn composite_confidence(candidate: &CandidateRecord, record: &CanonicalRecord) -> f64 {
    let mut score = BASE;

    if let (Some(a), Some(b)) = (&candidate.title, &record.title) {
        let (a, b) = (text::name_key(a), text::name_key(b));
        if a == b {
            score += TITLE_EXACT;
        } else if !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a)) {
            score += TITLE_PARTIAL;
        }
    }

    if let (Some(a), Some(b)) = (candidate.email_domain(), record.email_domain()) {
        if a.eq_ignore_ascii_case(b) {
            score += EMAIL_DOMAIN;
        }
    }

    if let (Some(a), Some(b)) = (&candidate.phone, &record.phone) {
        let (a, b) = (text::digits(a), text::digits(b));
        if !a.is_empty() && a == b {
            score += PHONE_DIGITS;
        }
    }

    let host = |url: &Option<String>| url.as_deref().and_then(text::url_host);
    if let (Some(a), Some(b)) = (host(&candidate.profile_url), host(&record.profile_url)) {
        if a == b {
            score += LINK_HOST;
        }
    }

    // Float sums like 0.5 + 0.2 + 0.15 + 0.1 land a hair off; round to the
    // precision the weights are defined at.
    ((score * 1000.0).round() / 1000.0).min(1.0)
}

/// True when the candidate carries information the record lacks
///
/// Only populated candidate fields are compared; a missing candidate field
/// never counts as a change.
pub fn has_changes(candidate: &CandidateRecord, record: &CanonicalRecord) -> bool {
    let differs = |new: &Option<String>, old: &Option<String>| match new {
        Some(value) => old.as_deref() != Some(value.as_str()),
        None => false,
    };

    differs(&candidate.title, &record.title)
        || differs(&candidate.email, &record.email)
        || differs(&candidate.phone, &record.phone)
        || differs(&candidate.location, &record.location)
        || differs(&candidate.profile_url, &record.profile_url)
        || candidate
            .research_areas
            .iter()
            .any(|tag| !record.research_areas.contains(tag))
}
