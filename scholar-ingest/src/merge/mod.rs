//! Enrichment Merge Engine
//!
//! Combines a canonical record with one research bundle into a partial
//! update, a conflict log and a confidence estimate.
//!
//! | Field kind | Rule |
//! |---|---|
//! | h-index, citation count | larger value wins; conflict when both present and different |
//! | research areas | case-sensitive union; `merge` conflict whenever the stored set is non-empty |
//! | biography, links, ORCID | first write wins; `keep_existing` conflict when both present and different |
//! | publications | passed through unchanged for idempotent upsert |
//!
//! A merge call is a terminal enrichment outcome: status becomes `complete`
//! with the supplied verification time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{
    CanonicalRecord, EnrichedDataBundle, EnrichmentStatus, MergeConflict, MergeOutcome,
    ResearcherUpdate, Resolution,
};

const BASE_CONFIDENCE: f64 = 0.5;
const H_INDEX_BONUS: f64 = 0.1;
const CITATION_BONUS: f64 = 0.1;
const AREAS_BONUS: f64 = 0.1;
const PUBLICATIONS_BONUS: f64 = 0.2;

/// One record and the bundle researched for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeItem {
    pub record: CanonicalRecord,
    pub bundle: EnrichedDataBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeInput {
    pub items: Vec<MergeItem>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutput {
    pub outcomes: Vec<MergeOutcome>,
    pub conflict_count: usize,
}

/// Merge every item of a batch
pub fn merge_batch(input: &MergeInput) -> MergeOutput {
    let outcomes: Vec<MergeOutcome> = input
        .items
        .iter()
        .map(|item| merge_enrichment(&item.record, &item.bundle, input.verified_at))
        .collect();
    MergeOutput {
        conflict_count: outcomes.iter().map(|o| o.conflicts.len()).sum(),
        outcomes,
    }
}

/// Merge one bundle into one record
pub fn merge_enrichment(
    record: &CanonicalRecord,
    bundle: &EnrichedDataBundle,
    verified_at: DateTime<Utc>,
) -> MergeOutcome {
    let mut conflicts = Vec::new();

    let h_index = merge_metric("h_index", record.h_index, bundle.h_index, &mut conflicts);
    let citation_count = merge_metric(
        "citation_count",
        record.citation_count,
        bundle.citation_count,
        &mut conflicts,
    );
    let research_areas = merge_tags(&record.research_areas, &bundle.research_areas, &mut conflicts);

    let biography = merge_descriptive("biography", &record.biography, &bundle.biography, &mut conflicts);
    let homepage_url = merge_descriptive(
        "homepage_url",
        &record.homepage_url,
        &bundle.homepage_url,
        &mut conflicts,
    );
    let scholar_profile_url = merge_descriptive(
        "scholar_profile_url",
        &record.scholar_profile_url,
        &bundle.scholar_profile_url,
        &mut conflicts,
    );
    let orcid = merge_descriptive("orcid", &record.orcid, &bundle.orcid, &mut conflicts);

    let merged_has_areas = research_areas
        .as_ref()
        .map_or(!record.research_areas.is_empty(), |areas| !areas.is_empty());
    let confidence = confidence_score(
        record.h_index.is_some() || h_index.is_some(),
        record.citation_count.is_some() || citation_count.is_some(),
        merged_has_areas,
        !bundle.publications.is_empty(),
    );

    MergeOutcome {
        update: ResearcherUpdate {
            id: record.id,
            h_index,
            citation_count,
            research_areas,
            biography,
            homepage_url,
            scholar_profile_url,
            orcid,
            enrichment_status: EnrichmentStatus::Complete,
            enrichment_confidence: confidence,
            last_verified_at: verified_at,
        },
        publications_to_add: bundle.publications.clone(),
        conflicts,
        confidence,
    }
}

/// Trust estimate for a merged record
pub fn confidence_score(
    has_h_index: bool,
    has_citations: bool,
    has_areas: bool,
    has_publications: bool,
) -> f64 {
    let mut score = BASE_CONFIDENCE;
    if has_h_index {
        score += H_INDEX_BONUS;
    }
    if has_citations {
        score += CITATION_BONUS;
    }
    if has_areas {
        score += AREAS_BONUS;
    }
    if has_publications {
        score += PUBLICATIONS_BONUS;
    }
    ((score * 1000.0).round() / 1000.0).min(1.0)
}

/// Returns the value to write, if any
fn merge_metric(
    field: &str,
    existing: Option<i64>,
    proposed: Option<i64>,
    conflicts: &mut Vec<MergeConflict>,
) -> Option<i64> {
    let proposed = proposed?;
    match existing {
        None => Some(proposed),
        Some(current) if current == proposed => None,
        Some(current) => {
            let resolution = if proposed > current {
                Resolution::UseNew
            } else {
                Resolution::KeepExisting
            };
            conflicts.push(MergeConflict {
                field: field.to_string(),
                existing: json!(current),
                proposed: json!(proposed),
                resolution,
            });
            (resolution == Resolution::UseNew).then_some(proposed)
        }
    }
}

/// Union in stored order, then new tags in bundle order
///
/// The `merge` conflict is logged whenever the stored set is non-empty, even
/// if the bundle proposes nothing new. The update is `None` when no tag is
/// added.
fn merge_tags(
    existing: &[String],
    proposed: &[String],
    conflicts: &mut Vec<MergeConflict>,
) -> Option<Vec<String>> {
    let mut union = existing.to_vec();
    for tag in proposed {
        if !union.contains(tag) {
            union.push(tag.clone());
        }
    }

    if !existing.is_empty() {
        conflicts.push(MergeConflict {
            field: "research_areas".to_string(),
            existing: json!(existing),
            proposed: json!(proposed),
            resolution: Resolution::Merge,
        });
    }

    (union.len() != existing.len()).then_some(union)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// First write wins
fn merge_descriptive(
    field: &str,
    existing: &Option<String>,
    proposed: &Option<String>,
    conflicts: &mut Vec<MergeConflict>,
) -> Option<String> {
    if is_blank(proposed) {
        return None;
    }
    if is_blank(existing) {
        return proposed.clone();
    }
    if existing != proposed {
        conflicts.push(MergeConflict {
            field: field.to_string(),
            existing: existing.as_deref().map_or(Value::Null, |v| json!(v)),
            proposed: proposed.as_deref().map_or(Value::Null, |v| json!(v)),
            resolution: Resolution::KeepExisting,
        });
    }
    None
}
