//! Job bookkeeping rows
//!
//! Written at every stage boundary of a full-mode job. Writes go through
//! [`retry_on_lock`] since they can land while another job holds a long
//! reconciliation transaction.

use chrono::{DateTime, Utc};
use scholar_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, timestamp};
use crate::models::{Job, JobCounts, JobKind, JobStatus, Stage};
use crate::utils::retry_on_lock;

const MAX_LOCK_WAIT_MS: u64 = 5000;

pub const STALE_SWEEP_MESSAGE: &str = "cancelled by stale-job sweep";

/// Insert or refresh a job row
pub async fn save_job(pool: &SqlitePool, job: &Job) -> Result<()> {
    // Prepare everything before touching the database
    let job_id = job.job_id.to_string();
    let counts = serde_json::to_string(&job.counts)
        .map_err(|e| Error::Internal(format!("Failed to serialize counts: {}", e)))?;
    let current_step = job.current_step.map(|s| s.as_str());
    let created_at = timestamp(job.created_at);
    let started_at = job.started_at.map(timestamp);
    let ended_at = job.ended_at.map(timestamp);

    retry_on_lock("save_job", MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, kind, unit_id, status, current_step, counts,
                error_message, created_at, started_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                current_step = excluded.current_step,
                counts = excluded.counts,
                error_message = excluded.error_message,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&job_id)
        .bind(job.kind.as_str())
        .bind(&job.unit_id)
        .bind(job.status.as_str())
        .bind(current_step)
        .bind(&counts)
        .bind(&job.error_message)
        .bind(&created_at)
        .bind(&started_at)
        .bind(&ended_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;

    let kind: JobKind = row.get::<String, _>("kind").parse().map_err(Error::Internal)?;
    let status: JobStatus = row.get::<String, _>("status").parse().map_err(Error::Internal)?;
    let current_step = row
        .get::<Option<String>, _>("current_step")
        .map(|s| s.parse::<Stage>())
        .transpose()
        .map_err(Error::Internal)?;

    let counts: String = row.get("counts");
    let counts: JobCounts = serde_json::from_str(&counts)
        .map_err(|e| Error::Internal(format!("Failed to deserialize counts: {}", e)))?;

    Ok(Job {
        job_id,
        kind,
        unit_id: row.get("unit_id"),
        status,
        current_step,
        counts,
        error_message: row.get("error_message"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "created_at")?,
        started_at: parse_optional_timestamp(row.get("started_at"), "started_at")?,
        ended_at: parse_optional_timestamp(row.get("ended_at"), "ended_at")?,
    })
}

pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query(
        "SELECT job_id, kind, unit_id, status, current_step, counts, error_message,
                created_at, started_at, ended_at
         FROM jobs WHERE job_id = ?",
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Mark running jobs started before `cutoff` as cancelled
///
/// Returns the ids that were swept.
pub async fn cancel_stale_jobs(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let now = timestamp(Utc::now());
    let mut tx = pool.begin().await?;

    let stale: Vec<(String,)> =
        sqlx::query_as("SELECT job_id FROM jobs WHERE status = 'running' AND started_at < ?")
            .bind(timestamp(cutoff))
            .fetch_all(&mut *tx)
            .await?;

    sqlx::query(
        "UPDATE jobs SET status = 'cancelled', error_message = ?, ended_at = ?
         WHERE status = 'running' AND started_at < ?",
    )
    .bind(STALE_SWEEP_MESSAGE)
    .bind(&now)
    .bind(timestamp(cutoff))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    stale
        .into_iter()
        .map(|(id,)| {
            Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))
        })
        .collect()
}
