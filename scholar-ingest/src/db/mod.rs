//! SQLite store
//!
//! Repositories take an explicit `&SqlitePool`; nothing holds a global
//! handle. The pool has a single connection since SQLite admits one writer;
//! jobs interleave at await points and queue for the connection.

pub mod directories;
pub mod enrichment_queue;
pub mod jobs;
pub mod publications;
pub mod researchers;
pub mod settings;

use chrono::{DateTime, SecondsFormat, Utc};
use scholar_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (creating if needed) the database file and bring the schema up
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let path = db_path
        .to_str()
        .ok_or_else(|| Error::Config(format!("Invalid database path: {}", db_path.display())))?;
    let options = SqliteConnectOptions::from_str(path)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;
    Ok(pool)
}

/// Private in-memory database (tests, dry runs)
///
/// The single connection is never recycled; dropping it would drop the data.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create every table (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS directories (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            affiliation TEXT NOT NULL,
            sub_unit TEXT,
            scrape_config TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            last_scraped_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Uniqueness on email and on (name, affiliation) is the safety net for
    // concurrent jobs inserting the same person.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS researchers (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            last_name TEXT NOT NULL,
            full_name TEXT NOT NULL,
            full_name_key TEXT NOT NULL,
            title TEXT,
            affiliation TEXT NOT NULL,
            sub_unit TEXT,
            email TEXT UNIQUE,
            phone TEXT,
            location TEXT,
            profile_url TEXT,
            research_areas TEXT NOT NULL DEFAULT '[]',
            h_index INTEGER,
            citation_count INTEGER,
            biography TEXT,
            homepage_url TEXT,
            scholar_profile_url TEXT,
            orcid TEXT,
            enrichment_status TEXT NOT NULL DEFAULT 'pending',
            enrichment_confidence REAL,
            last_verified_at TEXT,
            directory_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (full_name_key, affiliation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS publications (
            id TEXT PRIMARY KEY,
            researcher_id TEXT NOT NULL REFERENCES researchers(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            title_key TEXT NOT NULL,
            year INTEGER,
            venue TEXT,
            authors TEXT NOT NULL DEFAULT '[]',
            citation_count INTEGER,
            external_id TEXT,
            url TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (researcher_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrichment_queue (
            researcher_id TEXT PRIMARY KEY REFERENCES researchers(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT,
            last_error TEXT,
            queued_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            unit_id TEXT NOT NULL,
            status TEXT NOT NULL,
            current_step TEXT,
            counts TEXT NOT NULL DEFAULT '{}',
            error_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_status ON enrichment_queue(status, next_attempt_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, started_at)")
        .execute(pool)
        .await?;

    tracing::debug!("Database schema initialized");
    Ok(())
}

/// Stored timestamp form; fixed precision keeps TEXT comparison ordered
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}
