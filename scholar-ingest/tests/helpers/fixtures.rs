//! Directory markup and research fixtures

use anyhow::Result;
use scholar_ingest::models::{DirectoryRow, EnrichedDataBundle, Publication};
use sqlx::SqlitePool;

pub const DIRECTORY_URL: &str = "https://cs.x.edu/people";

/// One `.person` block in the default selector layout
pub fn person_block(name: &str, title: &str, email: &str, areas: &[&str]) -> String {
    let areas: String = areas
        .iter()
        .map(|a| format!(r#"<span class="research-area">{}</span>"#, a))
        .collect();
    format!(
        r#"<div class="person">
             <h3 class="name">{name}</h3>
             <span class="title">{title}</span>
             <a href="mailto:{email}">Email</a>
             {areas}
           </div>"#
    )
}

pub fn listing_page(blocks: &[String]) -> String {
    format!(
        "<html><body><main>{}</main></body></html>",
        blocks.join("\n")
    )
}

pub fn directory(id: &str, url: &str, scrape_config: Option<&str>) -> DirectoryRow {
    DirectoryRow {
        id: id.to_string(),
        url: url.to_string(),
        affiliation: "X University".to_string(),
        sub_unit: Some("Computer Science".to_string()),
        scrape_config: scrape_config.map(str::to_string),
        active: true,
    }
}

pub async fn seed_directory(pool: &SqlitePool, row: &DirectoryRow) -> Result<()> {
    scholar_ingest::db::directories::upsert_directory(pool, row).await?;
    Ok(())
}

pub fn publication(title: &str, year: i32, doi: &str) -> Publication {
    Publication {
        title: title.to_string(),
        year: Some(year),
        venue: Some("ICML".to_string()),
        authors: vec!["Jane Doe".to_string()],
        citation_count: Some(40),
        external_id: Some(doi.to_string()),
        url: None,
    }
}

pub fn bundle(h_index: i64, publications: Vec<Publication>) -> EnrichedDataBundle {
    EnrichedDataBundle {
        h_index: Some(h_index),
        citation_count: Some(h_index * 40),
        research_areas: vec!["Machine Learning".to_string()],
        biography: Some("Works on learning systems.".to_string()),
        orcid: Some("0000-0002-1825-0097".to_string()),
        publications,
        ..Default::default()
    }
}
