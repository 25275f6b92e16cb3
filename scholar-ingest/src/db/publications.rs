//! Publications attached to researchers
//!
//! Upserts are idempotent: a proposed publication matches a stored one by
//! external id (case-insensitive), or by normalized title plus year.

use chrono::Utc;
use scholar_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::timestamp;
use crate::models::Publication;
use crate::utils::text;

/// Counts from one upsert pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub added: usize,
    pub updated: usize,
}

async fn find_existing(
    conn: &mut SqliteConnection,
    researcher_id: &str,
    publication: &Publication,
) -> Result<Option<String>> {
    if let Some(external_id) = &publication.external_id {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM publications WHERE researcher_id = ? AND lower(external_id) = lower(?)",
        )
        .bind(researcher_id)
        .bind(external_id)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some((id,)) = row {
            return Ok(Some(id));
        }
    }

    let row: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM publications WHERE researcher_id = ? AND title_key = ? AND year IS ? LIMIT 1",
    )
    .bind(researcher_id)
    .bind(text::name_key(&publication.title))
    .bind(publication.year)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(id,)| id))
}

/// Insert new publications and refresh matched ones
pub async fn upsert_publications(
    conn: &mut SqliteConnection,
    researcher_id: Uuid,
    publications: &[Publication],
) -> Result<UpsertCounts> {
    let researcher_id = researcher_id.to_string();
    let now = timestamp(Utc::now());
    let mut counts = UpsertCounts::default();

    for publication in publications {
        let authors = serde_json::to_string(&publication.authors)
            .map_err(|e| Error::Internal(format!("Failed to serialize authors: {}", e)))?;

        match find_existing(conn, &researcher_id, publication).await? {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE publications SET
                        venue = COALESCE(?, venue),
                        citation_count = COALESCE(?, citation_count),
                        external_id = COALESCE(external_id, ?),
                        url = COALESCE(url, ?),
                        authors = CASE WHEN ? = '[]' THEN authors ELSE ? END,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&publication.venue)
                .bind(publication.citation_count)
                .bind(&publication.external_id)
                .bind(&publication.url)
                .bind(&authors)
                .bind(&authors)
                .bind(&now)
                .bind(id)
                .execute(&mut *conn)
                .await?;
                counts.updated += 1;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO publications (
                        id, researcher_id, title, title_key, year, venue, authors,
                        citation_count, external_id, url, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&researcher_id)
                .bind(&publication.title)
                .bind(text::name_key(&publication.title))
                .bind(publication.year)
                .bind(&publication.venue)
                .bind(&authors)
                .bind(publication.citation_count)
                .bind(&publication.external_id)
                .bind(&publication.url)
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn)
                .await?;
                counts.added += 1;
            }
        }
    }

    Ok(counts)
}

/// Stored publications of one researcher, newest first
pub async fn list_publications(pool: &SqlitePool, researcher_id: Uuid) -> Result<Vec<Publication>> {
    let rows = sqlx::query(
        "SELECT title, year, venue, authors, citation_count, external_id, url
         FROM publications WHERE researcher_id = ? ORDER BY year DESC, title",
    )
    .bind(researcher_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let authors: String = row.get("authors");
            Ok(Publication {
                title: row.get("title"),
                year: row.get("year"),
                venue: row.get("venue"),
                authors: serde_json::from_str(&authors)
                    .map_err(|e| Error::Internal(format!("Failed to deserialize authors: {}", e)))?,
                citation_count: row.get("citation_count"),
                external_id: row.get("external_id"),
                url: row.get("url"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::db::researchers::{persist_reconciled, PersistInput};
    use crate::models::CandidateRecord;

    async fn researcher(pool: &SqlitePool) -> Uuid {
        let outcome = persist_reconciled(
            pool,
            &PersistInput {
                directory_id: "cs".to_string(),
                inserts: vec![CandidateRecord {
                    first_name: "Jane".to_string(),
                    middle_name: None,
                    last_name: "Doe".to_string(),
                    full_name: "Jane Doe".to_string(),
                    title: None,
                    affiliation: "X University".to_string(),
                    sub_unit: None,
                    email: None,
                    phone: None,
                    location: None,
                    profile_url: None,
                    research_areas: vec![],
                    source_url: None,
                }],
                updates: vec![],
            },
        )
        .await
        .unwrap();
        outcome.inserted_ids[0]
    }

    fn publication(title: &str, year: Option<i32>, external_id: Option<&str>) -> Publication {
        Publication {
            title: title.to_string(),
            year,
            venue: None,
            authors: vec![],
            citation_count: None,
            external_id: external_id.map(str::to_string),
            url: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let pool = open_in_memory().await.unwrap();
        let id = researcher(&pool).await;
        let pubs = vec![
            publication("Deep Nets", Some(2020), Some("W1")),
            publication("Shallow Nets", None, None),
        ];

        let mut conn = pool.acquire().await.unwrap();
        let first = upsert_publications(&mut conn, id, &pubs).await.unwrap();
        let second = upsert_publications(&mut conn, id, &pubs).await.unwrap();
        drop(conn);

        assert_eq!(first, UpsertCounts { added: 2, updated: 0 });
        assert_eq!(second, UpsertCounts { added: 0, updated: 2 });
        assert_eq!(list_publications(&pool, id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_title_and_year_match_without_external_id() {
        let pool = open_in_memory().await.unwrap();
        let id = researcher(&pool).await;

        let mut conn = pool.acquire().await.unwrap();
        upsert_publications(&mut conn, id, &[publication("Deep  Nets", Some(2020), None)])
            .await
            .unwrap();

        let mut cited = publication("deep nets", Some(2020), Some("W1"));
        cited.citation_count = Some(12);
        let counts = upsert_publications(&mut conn, id, &[cited, publication("Deep Nets", Some(2021), None)])
            .await
            .unwrap();
        drop(conn);

        assert_eq!(counts, UpsertCounts { added: 1, updated: 1 });
        let stored = list_publications(&pool, id).await.unwrap();
        let matched = stored.iter().find(|p| p.year == Some(2020)).unwrap();
        assert_eq!(matched.external_id.as_deref(), Some("W1"));
        assert_eq!(matched.citation_count, Some(12));
    }
}
