//! Directory units

use chrono::{DateTime, Utc};
use scholar_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::timestamp;
use crate::models::DirectoryRow;

fn directory_from_row(row: &SqliteRow) -> DirectoryRow {
    DirectoryRow {
        id: row.get("id"),
        url: row.get("url"),
        affiliation: row.get("affiliation"),
        sub_unit: row.get("sub_unit"),
        scrape_config: row.get("scrape_config"),
        active: row.get::<i64, _>("active") != 0,
    }
}

pub async fn get_directory(pool: &SqlitePool, id: &str) -> Result<Option<DirectoryRow>> {
    let row = sqlx::query(
        "SELECT id, url, affiliation, sub_unit, scrape_config, active FROM directories WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(directory_from_row))
}

/// Active directories in id order
pub async fn list_active(pool: &SqlitePool) -> Result<Vec<DirectoryRow>> {
    let rows = sqlx::query(
        "SELECT id, url, affiliation, sub_unit, scrape_config, active
         FROM directories WHERE active = 1 ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(directory_from_row).collect())
}

pub async fn upsert_directory(pool: &SqlitePool, directory: &DirectoryRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO directories (id, url, affiliation, sub_unit, scrape_config, active)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            url = excluded.url,
            affiliation = excluded.affiliation,
            sub_unit = excluded.sub_unit,
            scrape_config = excluded.scrape_config,
            active = excluded.active
        "#,
    )
    .bind(&directory.id)
    .bind(&directory.url)
    .bind(&directory.affiliation)
    .bind(&directory.sub_unit)
    .bind(&directory.scrape_config)
    .bind(directory.active as i64)
    .execute(pool)
    .await?;

    Ok(())
}

/// Stamp a successful full scrape
pub async fn mark_scraped(pool: &SqlitePool, id: &str, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE directories SET last_scraped_at = ? WHERE id = ?")
        .bind(timestamp(at))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
