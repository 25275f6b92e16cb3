//! Enrichment queue
//!
//! One row per researcher. `pending` rows become due once `next_attempt_at`
//! passes (or immediately when it is unset). Claiming moves rows to
//! `in_progress`; a successful write-back marks them `done`. When every
//! research source fails the attempt counter grows and the next attempt is
//! pushed out exponentially until `max_attempts`, after which the row and the
//! researcher are `failed`.

use chrono::{DateTime, Duration, Utc};
use scholar_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::researchers::{record_from_row, RESEARCHER_COLUMNS};
use super::{parse_optional_timestamp, timestamp};
use crate::models::CanonicalRecord;

const MAX_RETRY_DELAY_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub queued: usize,
    pub already_queued: usize,
}

/// Researchers handed to one enrichment job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimedBatch {
    pub researchers: Vec<CanonicalRecord>,
    /// Pending rows in the queue before this claim, due or not
    pub total_pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub researcher_id: Uuid,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Attempts used up; the researcher is now `failed`
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub researcher_id: Uuid,
    pub status: String,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// `base * 2^(attempts-1)`, capped at 24 hours
pub fn retry_delay(base_minutes: i64, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(20);
    let minutes = base_minutes.max(0).saturating_mul(1i64 << exponent);
    Duration::minutes(minutes).min(Duration::hours(MAX_RETRY_DELAY_HOURS))
}

/// Queue researchers for enrichment
///
/// Rows already `pending` or `in_progress` are left alone and counted as
/// already queued; `done` and `failed` rows are reset.
pub async fn enqueue(pool: &SqlitePool, ids: &[Uuid]) -> Result<EnqueueOutcome> {
    let now = timestamp(Utc::now());
    let mut outcome = EnqueueOutcome::default();
    let mut tx = pool.begin().await?;

    for id in ids {
        let id = id.to_string();
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM enrichment_queue WHERE researcher_id = ?")
                .bind(&id)
                .fetch_optional(&mut *tx)
                .await?;

        match status.as_ref().map(|(s,)| s.as_str()) {
            Some("pending") | Some("in_progress") => {
                outcome.already_queued += 1;
                continue;
            }
            Some(_) => {
                sqlx::query(
                    "UPDATE enrichment_queue SET status = 'pending', attempts = 0,
                     next_attempt_at = NULL, last_error = NULL, queued_at = ?, updated_at = ?
                     WHERE researcher_id = ?",
                )
                .bind(&now)
                .bind(&now)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO enrichment_queue (researcher_id, status, attempts, queued_at, updated_at)
                     VALUES (?, 'pending', 0, ?, ?)",
                )
                .bind(&id)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("UPDATE researchers SET enrichment_status = 'pending' WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        outcome.queued += 1;
    }

    tx.commit().await?;
    Ok(outcome)
}

/// Take up to `size` due researchers, oldest first
///
/// With `peek` nothing changes state (test runs).
pub async fn claim_batch(
    pool: &SqlitePool,
    size: usize,
    now: DateTime<Utc>,
    peek: bool,
) -> Result<ClaimedBatch> {
    let now_text = timestamp(now);
    let mut tx = pool.begin().await?;

    let total_pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM enrichment_queue WHERE status = 'pending'")
            .fetch_one(&mut *tx)
            .await?;

    let ids: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT researcher_id FROM enrichment_queue
        WHERE status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
        ORDER BY queued_at, researcher_id
        LIMIT ?
        "#,
    )
    .bind(&now_text)
    .bind(size as i64)
    .fetch_all(&mut *tx)
    .await?;

    if !peek {
        for (id,) in &ids {
            sqlx::query(
                "UPDATE enrichment_queue SET status = 'in_progress', updated_at = ? WHERE researcher_id = ?",
            )
            .bind(&now_text)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("UPDATE researchers SET enrichment_status = 'in_progress' WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
    }

    let sql = format!("SELECT {} FROM researchers WHERE id = ?", RESEARCHER_COLUMNS);
    let mut researchers = Vec::with_capacity(ids.len());
    for (id,) in &ids {
        if let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await? {
            researchers.push(record_from_row(&row)?);
        }
    }

    tx.commit().await?;

    Ok(ClaimedBatch {
        researchers,
        total_pending: total_pending as usize,
    })
}

/// Return claimed rows to `pending` (job aborted before write-back)
pub async fn release_claims(pool: &SqlitePool, ids: &[Uuid]) -> Result<usize> {
    let now = timestamp(Utc::now());
    let mut released = 0;
    let mut tx = pool.begin().await?;

    for id in ids {
        let id = id.to_string();
        let result = sqlx::query(
            "UPDATE enrichment_queue SET status = 'pending', updated_at = ?
             WHERE researcher_id = ? AND status = 'in_progress'",
        )
        .bind(&now)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            sqlx::query("UPDATE researchers SET enrichment_status = 'pending' WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            released += 1;
        }
    }

    tx.commit().await?;
    Ok(released)
}

/// Return rows claimed before `cutoff` to `pending`
///
/// Claims left behind by a process that died mid-batch are never settled
/// otherwise. Returns the released researcher ids.
pub async fn release_stale_claims(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let stale: Vec<(String,)> = sqlx::query_as(
        "SELECT researcher_id FROM enrichment_queue
         WHERE status = 'in_progress' AND updated_at < ?
         ORDER BY researcher_id",
    )
    .bind(timestamp(cutoff))
    .fetch_all(pool)
    .await?;

    let ids = stale
        .iter()
        .map(|(id,)| {
            Uuid::parse_str(id)
                .map_err(|e| Error::Internal(format!("bad researcher id '{}': {}", id, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    release_claims(pool, &ids).await?;
    Ok(ids)
}

/// Record a failed attempt and schedule the next one
pub async fn schedule_retry(
    pool: &SqlitePool,
    researcher_id: Uuid,
    error: &str,
    policy: RetryPolicy,
    now: DateTime<Utc>,
) -> Result<RetryOutcome> {
    let id = researcher_id.to_string();
    let mut tx = pool.begin().await?;

    let attempts: Option<i64> =
        sqlx::query_scalar("SELECT attempts FROM enrichment_queue WHERE researcher_id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
    let attempts = attempts.unwrap_or(0) as u32 + 1;
    let exhausted = attempts >= policy.max_attempts;

    let next_attempt_at = (!exhausted).then(|| now + retry_delay(policy.base_minutes, attempts));
    let (queue_status, researcher_status) = if exhausted {
        ("failed", "failed")
    } else {
        ("pending", "pending")
    };

    sqlx::query(
        r#"
        INSERT INTO enrichment_queue (researcher_id, status, attempts, next_attempt_at, last_error, queued_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(researcher_id) DO UPDATE SET
            status = excluded.status,
            attempts = excluded.attempts,
            next_attempt_at = excluded.next_attempt_at,
            last_error = excluded.last_error,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&id)
    .bind(queue_status)
    .bind(attempts as i64)
    .bind(next_attempt_at.map(timestamp))
    .bind(error)
    .bind(timestamp(now))
    .bind(timestamp(now))
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE researchers SET enrichment_status = ? WHERE id = ?")
        .bind(researcher_status)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    if exhausted {
        tracing::warn!(researcher_id = %researcher_id, attempts, "Enrichment attempts exhausted");
    } else {
        tracing::debug!(researcher_id = %researcher_id, attempts, "Enrichment retry scheduled");
    }

    Ok(RetryOutcome {
        researcher_id,
        attempts,
        next_attempt_at,
        exhausted,
    })
}

pub async fn queue_entry(pool: &SqlitePool, researcher_id: Uuid) -> Result<Option<QueueEntry>> {
    let row = sqlx::query(
        "SELECT status, attempts, next_attempt_at, last_error FROM enrichment_queue WHERE researcher_id = ?",
    )
    .bind(researcher_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(QueueEntry {
            researcher_id,
            status: row.get("status"),
            attempts: row.get::<i64, _>("attempts") as u32,
            next_attempt_at: parse_optional_timestamp(row.get("next_attempt_at"), "next_attempt_at")?,
            last_error: row.get("last_error"),
        })
    })
    .transpose()
}
