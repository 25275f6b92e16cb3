//! Researcher records
//!
//! Reconciled candidates for one job are written in a single transaction.
//! Each record gets its own savepoint, so a uniqueness violation (another
//! job inserted the same person first) skips that record and the rest of the
//! batch still commits. Any other failure rolls the whole job's writes back.

use chrono::Utc;
use scholar_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::publications::upsert_publications;
use super::{parse_optional_timestamp, parse_timestamp, timestamp};
use crate::models::{CanonicalRecord, CandidateRecord, EnrichmentStatus, MergeOutcome};
use crate::reconcile::PlannedUpdate;

pub(crate) const RESEARCHER_COLUMNS: &str = "id, first_name, middle_name, last_name, full_name, \
    title, affiliation, sub_unit, email, phone, location, profile_url, research_areas, h_index, \
    citation_count, biography, homepage_url, scholar_profile_url, orcid, enrichment_status, \
    enrichment_confidence, last_verified_at, directory_id, created_at, updated_at";

/// Writes planned for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistInput {
    pub directory_id: String,
    pub inserts: Vec<CandidateRecord>,
    pub updates: Vec<PlannedUpdate>,
}

/// A planned write that did not land
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistSkip {
    pub full_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub inserted_ids: Vec<Uuid>,
    pub updated_ids: Vec<Uuid>,
    pub skipped: Vec<PersistSkip>,
}

pub(crate) fn record_from_row(row: &SqliteRow) -> Result<CanonicalRecord> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Failed to parse researcher id: {}", e)))?;

    let areas: String = row.get("research_areas");
    let research_areas: Vec<String> = serde_json::from_str(&areas)
        .map_err(|e| Error::Internal(format!("Failed to deserialize research_areas: {}", e)))?;

    let status: String = row.get("enrichment_status");
    let enrichment_status = status
        .parse::<EnrichmentStatus>()
        .map_err(Error::Internal)?;

    Ok(CanonicalRecord {
        id,
        first_name: row.get("first_name"),
        middle_name: row.get("middle_name"),
        last_name: row.get("last_name"),
        full_name: row.get("full_name"),
        title: row.get("title"),
        affiliation: row.get("affiliation"),
        sub_unit: row.get("sub_unit"),
        email: row.get("email"),
        phone: row.get("phone"),
        location: row.get("location"),
        profile_url: row.get("profile_url"),
        research_areas,
        h_index: row.get("h_index"),
        citation_count: row.get("citation_count"),
        biography: row.get("biography"),
        homepage_url: row.get("homepage_url"),
        scholar_profile_url: row.get("scholar_profile_url"),
        orcid: row.get("orcid"),
        enrichment_status,
        enrichment_confidence: row.get("enrichment_confidence"),
        last_verified_at: parse_optional_timestamp(row.get("last_verified_at"), "last_verified_at")?,
        directory_id: row.get("directory_id"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "created_at")?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"), "updated_at")?,
    })
}

pub async fn get_researcher(pool: &SqlitePool, id: Uuid) -> Result<Option<CanonicalRecord>> {
    let sql = format!("SELECT {} FROM researchers WHERE id = ?", RESEARCHER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(record_from_row).transpose()
}

/// Records for `ids`, in the given order; unknown ids are left out
pub async fn get_researchers(pool: &SqlitePool, ids: &[Uuid]) -> Result<Vec<CanonicalRecord>> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = get_researcher(pool, *id).await? {
            records.push(record);
        }
    }
    Ok(records)
}

pub async fn count_researchers(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM researchers")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Stored records sharing an email or (name key, affiliation) with any
/// candidate, ordered by id
pub async fn find_matches(
    pool: &SqlitePool,
    candidates: &[CandidateRecord],
) -> Result<Vec<CanonicalRecord>> {
    let sql = format!(
        "SELECT {} FROM researchers WHERE email = ? OR (full_name_key = ? AND affiliation = ?)",
        RESEARCHER_COLUMNS
    );

    let mut found: BTreeMap<Uuid, CanonicalRecord> = BTreeMap::new();
    for candidate in candidates {
        let rows = sqlx::query(&sql)
            .bind(&candidate.email)
            .bind(candidate.full_name_key())
            .bind(&candidate.affiliation)
            .fetch_all(pool)
            .await?;
        for row in &rows {
            let record = record_from_row(row)?;
            found.entry(record.id).or_insert(record);
        }
    }
    Ok(found.into_values().collect())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

async fn insert_researcher(
    conn: &mut SqliteConnection,
    id: Uuid,
    candidate: &CandidateRecord,
    directory_id: &str,
) -> std::result::Result<(), sqlx::Error> {
    let areas = serde_json::to_string(&candidate.research_areas)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let now = timestamp(Utc::now());

    sqlx::query(
        r#"
        INSERT INTO researchers (
            id, first_name, middle_name, last_name, full_name, full_name_key,
            title, affiliation, sub_unit, email, phone, location, profile_url,
            research_areas, enrichment_status, directory_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&candidate.first_name)
    .bind(&candidate.middle_name)
    .bind(&candidate.last_name)
    .bind(&candidate.full_name)
    .bind(candidate.full_name_key())
    .bind(&candidate.title)
    .bind(&candidate.affiliation)
    .bind(&candidate.sub_unit)
    .bind(&candidate.email)
    .bind(&candidate.phone)
    .bind(&candidate.location)
    .bind(&candidate.profile_url)
    .bind(areas)
    .bind(directory_id)
    .bind(&now)
    .bind(&now)
    .execute(conn)
    .await?;

    Ok(())
}

/// Returns false when the record no longer exists
async fn update_researcher(
    conn: &mut SqliteConnection,
    update: &PlannedUpdate,
    directory_id: &str,
) -> std::result::Result<bool, sqlx::Error> {
    let stored: Option<(String,)> = sqlx::query_as("SELECT research_areas FROM researchers WHERE id = ?")
        .bind(update.id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    let Some((stored_areas,)) = stored else {
        return Ok(false);
    };

    let mut areas: Vec<String> =
        serde_json::from_str(&stored_areas).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    for tag in &update.candidate.research_areas {
        if !areas.contains(tag) {
            areas.push(tag.clone());
        }
    }
    let areas = serde_json::to_string(&areas).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    let candidate = &update.candidate;
    sqlx::query(
        r#"
        UPDATE researchers SET
            title = COALESCE(?, title),
            sub_unit = COALESCE(?, sub_unit),
            email = COALESCE(?, email),
            phone = COALESCE(?, phone),
            location = COALESCE(?, location),
            profile_url = COALESCE(?, profile_url),
            research_areas = ?,
            directory_id = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&candidate.title)
    .bind(&candidate.sub_unit)
    .bind(&candidate.email)
    .bind(&candidate.phone)
    .bind(&candidate.location)
    .bind(&candidate.profile_url)
    .bind(areas)
    .bind(directory_id)
    .bind(timestamp(Utc::now()))
    .bind(update.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(true)
}

/// Apply one job's inserts and updates
pub async fn persist_reconciled(pool: &SqlitePool, input: &PersistInput) -> Result<PersistOutcome> {
    let mut outcome = PersistOutcome::default();
    let mut tx = pool.begin().await?;

    for candidate in &input.inserts {
        let id = Uuid::new_v4();
        let mut savepoint = tx.begin().await?;
        match insert_researcher(&mut savepoint, id, candidate, &input.directory_id).await {
            Ok(()) => {
                savepoint.commit().await?;
                outcome.inserted_ids.push(id);
            }
            Err(e) if is_unique_violation(&e) => {
                savepoint.rollback().await?;
                tracing::debug!(name = %candidate.full_name, "Insert hit uniqueness constraint, skipping");
                outcome.skipped.push(PersistSkip {
                    full_name: candidate.full_name.clone(),
                    reason: "already stored".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }

    for update in &input.updates {
        let mut savepoint = tx.begin().await?;
        match update_researcher(&mut savepoint, update, &input.directory_id).await {
            Ok(true) => {
                savepoint.commit().await?;
                outcome.updated_ids.push(update.id);
            }
            Ok(false) => {
                savepoint.rollback().await?;
                outcome.skipped.push(PersistSkip {
                    full_name: update.candidate.full_name.clone(),
                    reason: "matched record no longer exists".to_string(),
                });
            }
            Err(e) if is_unique_violation(&e) => {
                savepoint.rollback().await?;
                tracing::debug!(id = %update.id, "Update hit uniqueness constraint, skipping");
                outcome.skipped.push(PersistSkip {
                    full_name: update.candidate.full_name.clone(),
                    reason: "contact identifier already belongs to another record".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }

    tx.commit().await?;
    Ok(outcome)
}

/// Result of writing one merge outcome back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentWrite {
    pub researcher_id: Uuid,
    pub success: bool,
    pub publications_added: usize,
    pub publications_updated: usize,
}

/// Write one merge outcome in its own transaction: record fields,
/// publications, and completion of the queue item
///
/// `success` is false when the researcher no longer exists.
pub async fn apply_enrichment(pool: &SqlitePool, outcome: &MergeOutcome) -> Result<EnrichmentWrite> {
    let update = &outcome.update;
    let id = update.id.to_string();
    let areas = update
        .research_areas
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize research_areas: {}", e)))?;
    let now = timestamp(Utc::now());

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE researchers SET
            h_index = COALESCE(?, h_index),
            citation_count = COALESCE(?, citation_count),
            research_areas = COALESCE(?, research_areas),
            biography = COALESCE(?, biography),
            homepage_url = COALESCE(?, homepage_url),
            scholar_profile_url = COALESCE(?, scholar_profile_url),
            orcid = COALESCE(?, orcid),
            enrichment_status = ?,
            enrichment_confidence = ?,
            last_verified_at = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(update.h_index)
    .bind(update.citation_count)
    .bind(areas)
    .bind(&update.biography)
    .bind(&update.homepage_url)
    .bind(&update.scholar_profile_url)
    .bind(&update.orcid)
    .bind(update.enrichment_status.as_str())
    .bind(update.enrichment_confidence)
    .bind(timestamp(update.last_verified_at))
    .bind(&now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(EnrichmentWrite {
            researcher_id: update.id,
            success: false,
            publications_added: 0,
            publications_updated: 0,
        });
    }

    let counts = upsert_publications(&mut tx, update.id, &outcome.publications_to_add).await?;

    sqlx::query(
        "UPDATE enrichment_queue SET status = 'done', last_error = NULL, next_attempt_at = NULL, updated_at = ?
         WHERE researcher_id = ?",
    )
    .bind(&now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(EnrichmentWrite {
        researcher_id: update.id,
        success: true,
        publications_added: counts.added,
        publications_updated: counts.updated,
    })
}
