//! Reconciliation Engine
//!
//! Decides insert / update / skip for each candidate against the records
//! already in the store. Deterministic given the same candidates and the
//! same existing records.
//!
//! **Precedence:**
//! 1. Exact identifier match (normalized email shared with exactly one
//!    record): confidence 1.0
//! 2. Composite match on (full name, affiliation[, sub-unit]) scored by
//!    [`composite_confidence`]; usable only at >= 0.9
//! 3. Change detection on any usable match: `update` if a populated field
//!    differs or a new research-area tag appears, else `skip`
//! 4. Otherwise `insert` with confidence 1.0
//!
//! Within one batch a stored record is claimed by at most one candidate, and
//! two new candidates with the same email or (name, affiliation) produce a
//! single insert.

mod scoring;

pub use scoring::{composite_confidence, has_changes, USABLE_CONFIDENCE};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{CanonicalRecord, CandidateRecord};

pub const REASON_IDENTIFIER: &str = "exact identifier match";
pub const REASON_COMPOSITE: &str = "composite name and affiliation match";
pub const REASON_NO_MATCH: &str = "no match";
pub const REASON_LOW_CONFIDENCE: &str = "composite match below threshold";
pub const REASON_BATCH_DUPLICATE: &str = "duplicate within batch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Insert,
    Update,
    Skip,
}

/// Outcome of comparing one candidate to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDecision {
    pub candidate_index: usize,
    pub action: DecisionAction,
    pub matched_id: Option<Uuid>,
    pub reason: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationInput {
    pub unit_id: String,
    pub candidates: Vec<CandidateRecord>,
    /// Stored records that share an email or (name, affiliation) with some
    /// candidate
    pub existing: Vec<CanonicalRecord>,
}

/// A candidate that will overwrite a stored record's directory fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedUpdate {
    pub id: Uuid,
    pub candidate: CandidateRecord,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub candidate: CandidateRecord,
    pub matched_id: Option<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub total: usize,
    pub inserts: usize,
    pub updates: usize,
    pub skips: usize,
    pub identifier_matches: usize,
    pub composite_matches: usize,
    /// Composite candidates that scored under the threshold and inserted
    pub below_threshold: usize,
    pub batch_duplicates: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationOutput {
    pub inserts: Vec<CandidateRecord>,
    pub updates: Vec<PlannedUpdate>,
    pub skips: Vec<SkippedCandidate>,
    pub decisions: Vec<ReconciliationDecision>,
    pub stats: ReconcileStats,
}

/// Match found for one candidate, before change detection
struct Match<'a> {
    record: &'a CanonicalRecord,
    confidence: f64,
    reason: &'static str,
}

enum Lookup<'a> {
    Found(Match<'a>),
    BelowThreshold,
    None,
}

fn find_match<'a>(candidate: &CandidateRecord, existing: &'a [CanonicalRecord]) -> Lookup<'a> {
    // 1. Exact identifier
    if let Some(email) = candidate.email.as_deref() {
        let mut sharing = existing
            .iter()
            .filter(|r| r.email.as_deref() == Some(email));
        if let (Some(record), None) = (sharing.next(), sharing.next()) {
            return Lookup::Found(Match {
                record,
                confidence: 1.0,
                reason: REASON_IDENTIFIER,
            });
        }
    }

    // 2. Composite identity
    if candidate.affiliation.trim().is_empty() || candidate.full_name.trim().is_empty() {
        return Lookup::None;
    }
    let name_key = candidate.full_name_key();
    let best = existing
        .iter()
        .filter(|r| r.affiliation == candidate.affiliation && r.full_name_key() == name_key)
        .filter(|r| match (&candidate.sub_unit, &r.sub_unit) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        })
        .map(|r| (r, composite_confidence(candidate, r)))
        .max_by(|(ra, ca), (rb, cb)| ca.total_cmp(cb).then_with(|| rb.id.cmp(&ra.id)));

    match best {
        Some((record, confidence)) if confidence >= USABLE_CONFIDENCE => Lookup::Found(Match {
            record,
            confidence,
            reason: REASON_COMPOSITE,
        }),
        Some(_) => Lookup::BelowThreshold,
        None => Lookup::None,
    }
}

/// Decide for a single candidate in isolation
pub fn reconcile_candidate(
    candidate_index: usize,
    candidate: &CandidateRecord,
    existing: &[CanonicalRecord],
) -> ReconciliationDecision {
    match find_match(candidate, existing) {
        Lookup::Found(m) => ReconciliationDecision {
            candidate_index,
            action: if has_changes(candidate, m.record) {
                DecisionAction::Update
            } else {
                DecisionAction::Skip
            },
            matched_id: Some(m.record.id),
            reason: m.reason.to_string(),
            confidence: m.confidence,
        },
        Lookup::BelowThreshold => ReconciliationDecision {
            candidate_index,
            action: DecisionAction::Insert,
            matched_id: None,
            reason: REASON_LOW_CONFIDENCE.to_string(),
            confidence: 1.0,
        },
        Lookup::None => ReconciliationDecision {
            candidate_index,
            action: DecisionAction::Insert,
            matched_id: None,
            reason: REASON_NO_MATCH.to_string(),
            confidence: 1.0,
        },
    }
}

/// Partition a batch into insert / update / skip lists
pub fn reconcile_batch(input: &ReconciliationInput) -> ReconciliationOutput {
    let mut out = ReconciliationOutput::default();
    let mut claimed: HashSet<Uuid> = HashSet::new();
    let mut new_emails: HashSet<String> = HashSet::new();
    let mut new_identities: HashSet<(String, String)> = HashSet::new();

    for (index, candidate) in input.candidates.iter().enumerate() {
        out.stats.total += 1;
        let mut decision = reconcile_candidate(index, candidate, &input.existing);

        match decision.reason.as_str() {
            REASON_IDENTIFIER => out.stats.identifier_matches += 1,
            REASON_COMPOSITE => out.stats.composite_matches += 1,
            REASON_LOW_CONFIDENCE => out.stats.below_threshold += 1,
            _ => {}
        }

        let duplicate = match decision.matched_id {
            Some(id) => !claimed.insert(id),
            None => {
                let email_seen = candidate
                    .email
                    .as_ref()
                    .is_some_and(|e| !new_emails.insert(e.clone()));
                let identity_seen = !new_identities.insert(candidate.identity_key());
                email_seen || identity_seen
            }
        };
        if duplicate {
            decision.action = DecisionAction::Skip;
            decision.reason = REASON_BATCH_DUPLICATE.to_string();
            out.stats.batch_duplicates += 1;
        }

        match decision.action {
            DecisionAction::Insert => {
                out.stats.inserts += 1;
                out.inserts.push(candidate.clone());
            }
            DecisionAction::Update => {
                out.stats.updates += 1;
                out.updates.push(PlannedUpdate {
                    id: decision.matched_id.unwrap_or_default(),
                    candidate: candidate.clone(),
                    confidence: decision.confidence,
                    reason: decision.reason.clone(),
                });
            }
            DecisionAction::Skip => {
                out.stats.skips += 1;
                out.skips.push(SkippedCandidate {
                    candidate: candidate.clone(),
                    matched_id: decision.matched_id,
                    reason: decision.reason.clone(),
                });
            }
        }
        out.decisions.push(decision);
    }

    tracing::debug!(
        unit_id = %input.unit_id,
        inserts = out.stats.inserts,
        updates = out.stats.updates,
        skips = out.stats.skips,
        "Reconciled batch"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrichmentStatus;
    use chrono::Utc;

    pub(super) fn candidate() -> CandidateRecord {
        CandidateRecord {
            first_name: "Jane".to_string(),
            middle_name: None,
            last_name: "Doe".to_string(),
            full_name: "Jane Doe".to_string(),
            title: Some("Professor".to_string()),
            affiliation: "X University/CS".to_string(),
            sub_unit: None,
            email: Some("jane@x.edu".to_string()),
            phone: None,
            location: None,
            profile_url: None,
            research_areas: vec![],
            source_url: None,
        }
    }

    pub(super) fn stored(from: &CandidateRecord) -> CanonicalRecord {
        let now = Utc::now();
        CanonicalRecord {
            id: Uuid::new_v4(),
            first_name: from.first_name.clone(),
            middle_name: from.middle_name.clone(),
            last_name: from.last_name.clone(),
            full_name: from.full_name.clone(),
            title: from.title.clone(),
            affiliation: from.affiliation.clone(),
            sub_unit: from.sub_unit.clone(),
            email: from.email.clone(),
            phone: from.phone.clone(),
            location: from.location.clone(),
            profile_url: from.profile_url.clone(),
            research_areas: from.research_areas.clone(),
            h_index: None,
            citation_count: None,
            biography: None,
            homepage_url: None,
            scholar_profile_url: None,
            orcid: None,
            enrichment_status: EnrichmentStatus::Pending,
            enrichment_confidence: None,
            last_verified_at: None,
            directory_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_empty_store_inserts() {
        let decision = reconcile_candidate(0, &candidate(), &[]);
        assert_eq!(decision.action, DecisionAction::Insert);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.matched_id, None);
    }

    #[test]
    fn test_unchanged_resubmission_skips() {
        let existing = stored(&candidate());
        let decision = reconcile_candidate(0, &candidate(), std::slice::from_ref(&existing));
        assert_eq!(decision.action, DecisionAction::Skip);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.reason, "exact identifier match");
        assert_eq!(decision.matched_id, Some(existing.id));
    }

    #[test]
    fn test_title_change_updates() {
        let existing = stored(&candidate());
        let mut changed = candidate();
        changed.title = Some("Associate Professor".to_string());
        let decision = reconcile_candidate(0, &changed, std::slice::from_ref(&existing));
        assert_eq!(decision.action, DecisionAction::Update);
        assert_eq!(decision.matched_id, Some(existing.id));
    }

    #[test]
    fn test_new_tag_updates_but_subset_skips() {
        let mut base = candidate();
        base.research_areas = vec!["ML".to_string(), "Vision".to_string()];
        let existing = stored(&base);

        let mut subset = candidate();
        subset.research_areas = vec!["ML".to_string()];
        assert_eq!(
            reconcile_candidate(0, &subset, std::slice::from_ref(&existing)).action,
            DecisionAction::Skip
        );

        let mut extra = candidate();
        extra.research_areas = vec!["Robotics".to_string()];
        assert_eq!(
            reconcile_candidate(0, &extra, std::slice::from_ref(&existing)).action,
            DecisionAction::Update
        );
    }

    #[test]
    fn test_composite_requires_threshold() {
        let mut with_phone = candidate();
        with_phone.phone = Some("555-010-2000".to_string());
        let mut record = stored(&with_phone);
        record.email = Some("jdoe@x.edu".to_string());

        // title exact + same domain + same phone = 0.95
        let usable = reconcile_candidate(0, &with_phone, std::slice::from_ref(&record));
        assert_eq!(usable.reason, REASON_COMPOSITE);
        assert_eq!(usable.matched_id, Some(record.id));
        assert_eq!(usable.action, DecisionAction::Update);

        // Without the phone the score is 0.85: falls through to insert
        let mut weaker = candidate();
        weaker.phone = None;
        record.phone = None;
        let fallback = reconcile_candidate(0, &weaker, std::slice::from_ref(&record));
        assert_eq!(fallback.action, DecisionAction::Insert);
        assert_eq!(fallback.confidence, 1.0);
        assert_eq!(fallback.reason, REASON_LOW_CONFIDENCE);
    }

    #[test]
    fn test_no_identifier_no_affiliation_inserts() {
        let mut bare = candidate();
        bare.email = None;
        bare.affiliation = String::new();
        let existing = stored(&candidate());
        assert_eq!(
            reconcile_candidate(0, &bare, &[existing]).action,
            DecisionAction::Insert
        );
    }

    #[test]
    fn test_batch_suppresses_duplicates() {
        let existing = stored(&candidate());
        let mut changed = candidate();
        changed.title = Some("Chair".to_string());

        let mut fresh = candidate();
        fresh.full_name = "John Roe".to_string();
        fresh.email = Some("john@x.edu".to_string());

        let out = reconcile_batch(&ReconciliationInput {
            unit_id: "dir-1".to_string(),
            candidates: vec![changed.clone(), changed, fresh.clone(), fresh],
            existing: vec![existing],
        });

        assert_eq!(out.updates.len(), 1);
        assert_eq!(out.inserts.len(), 1);
        assert_eq!(out.skips.len(), 2);
        assert!(out
            .skips
            .iter()
            .all(|s| s.reason == REASON_BATCH_DUPLICATE));
        assert_eq!(out.stats.batch_duplicates, 2);
        assert_eq!(out.decisions.len(), 4);
    }
}
