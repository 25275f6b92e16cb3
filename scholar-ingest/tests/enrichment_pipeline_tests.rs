//! Enrichment pipeline over a scraped store

mod helpers;

use helpers::*;
use scholar_ingest::collaborators::{MockFetcher, MockResearchSource, ResearchSource};
use scholar_ingest::db;
use scholar_ingest::models::{EnrichmentStatus, ExecutionMode, JobOptions, JobStatus, Stage};
use scholar_ingest::IngestSettings;
use std::sync::Arc;

fn listing() -> MockFetcher {
    MockFetcher::new().with_page(
        DIRECTORY_URL,
        listing_page(&[
            person_block("Jane Doe", "Professor", "jane.doe@x.edu", &["Vision"]),
            person_block("John Roe", "Lecturer", "jroe@x.edu", &[]),
        ]),
    )
}

/// Scrape the fixture directory so two researchers are queued
async fn scraped(sources: Vec<Arc<dyn ResearchSource>>, settings: IngestSettings) -> TestHarness {
    let harness = create_test_orchestrator_with(Arc::new(listing()), sources, settings)
        .await
        .unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();
    let result = harness.orchestrator.run_job("cs", JobOptions::default()).await;
    assert_eq!(result.counts.created, 2);
    harness
}

async fn researcher_id(harness: &TestHarness, email: &str) -> uuid::Uuid {
    let (id,): (String,) = sqlx::query_as("SELECT id FROM researchers WHERE email = ?")
        .bind(email)
        .fetch_one(harness.db())
        .await
        .unwrap();
    id.parse().unwrap()
}

#[tokio::test]
async fn test_enrichment_merges_and_completes_queue() {
    let openalex = MockResearchSource::new("openalex")
        .with_result("Jane Doe", bundle(12, vec![publication("Deep Vision", 2021, "10.1/dv")]))
        .with_default(bundle(3, vec![]));
    let sources: Vec<Arc<dyn ResearchSource>> =
        vec![Arc::new(openalex), Arc::new(MockResearchSource::failing("orcid"))];
    let harness = scraped(sources, IngestSettings::default()).await;

    let result = harness.orchestrator.run_enrichment_batch(JobOptions::default()).await;

    assert_eq!(result.status, JobStatus::Success, "{:?}", result.error_message);
    assert_eq!(result.stages_completed, Stage::ENRICHMENT.to_vec());
    assert_eq!(result.counts.found, 2);
    assert_eq!(result.counts.updated, 2);
    // orcid failed for both researchers
    assert_eq!(result.counts.errors, 2);

    let jane_id = researcher_id(&harness, "jane.doe@x.edu").await;
    let jane = db::researchers::get_researcher(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jane.h_index, Some(12));
    assert_eq!(jane.orcid.as_deref(), Some("0000-0002-1825-0097"));
    assert_eq!(jane.enrichment_status, EnrichmentStatus::Complete);
    assert!(jane.last_verified_at.is_some());
    assert!(jane.research_areas.contains(&"Vision".to_string()));
    assert!(jane.research_areas.contains(&"Machine Learning".to_string()));

    let publications = db::publications::list_publications(harness.db(), jane_id)
        .await
        .unwrap();
    assert_eq!(publications.len(), 1);
    assert_eq!(publications[0].title, "Deep Vision");

    let entry = db::enrichment_queue::queue_entry(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, "done");

    // Nothing left to do
    let again = harness.orchestrator.run_enrichment_batch(JobOptions::default()).await;
    assert_eq!(again.status, JobStatus::Success);
    assert_eq!(again.counts.found, 0);
    assert_eq!(again.stages_completed, vec![Stage::FetchBatch]);
}

#[tokio::test]
async fn test_all_sources_failing_schedules_retry() {
    let sources: Vec<Arc<dyn ResearchSource>> = vec![
        Arc::new(MockResearchSource::failing("openalex")),
        Arc::new(MockResearchSource::failing("orcid")),
    ];
    let harness = scraped(sources, IngestSettings::default()).await;

    let result = harness.orchestrator.run_enrichment_batch(JobOptions::default()).await;

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.counts.updated, 0);

    let jane_id = researcher_id(&harness, "jane.doe@x.edu").await;
    let entry = db::enrichment_queue::queue_entry(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, "pending");
    assert_eq!(entry.attempts, 1);
    assert!(entry.next_attempt_at.is_some_and(|at| at > chrono::Utc::now()));
    assert!(entry.last_error.unwrap().contains("unavailable"));

    let jane = db::researchers::get_researcher(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jane.h_index, None);

    // Not due yet
    let again = harness.orchestrator.run_enrichment_batch(JobOptions::default()).await;
    assert_eq!(again.counts.found, 0);
}

#[tokio::test]
async fn test_exhausted_retries_mark_failed() {
    let sources: Vec<Arc<dyn ResearchSource>> = vec![Arc::new(MockResearchSource::failing("openalex"))];
    let settings = IngestSettings {
        research_sources: vec!["openalex".to_string()],
        max_enrichment_attempts: 1,
        ..Default::default()
    };
    let harness = scraped(sources, settings).await;

    harness.orchestrator.run_enrichment_batch(JobOptions::default()).await;

    let jane_id = researcher_id(&harness, "jane.doe@x.edu").await;
    let entry = db::enrichment_queue::queue_entry(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, "failed");
    let jane = db::researchers::get_researcher(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jane.enrichment_status, EnrichmentStatus::Failed);
}

#[tokio::test]
async fn test_test_mode_peeks_without_writes() {
    let sources: Vec<Arc<dyn ResearchSource>> =
        vec![Arc::new(MockResearchSource::new("openalex").with_default(bundle(5, vec![])))];
    let settings = IngestSettings {
        research_sources: vec!["openalex".to_string()],
        test_sample_size: 1,
        ..Default::default()
    };
    let harness = scraped(sources, settings).await;

    let result = harness.orchestrator.run_enrichment_batch(JobOptions::test()).await;

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(
        result.stages_completed,
        vec![Stage::FetchBatch, Stage::DeepResearch, Stage::Merge]
    );
    assert_eq!(result.counts.found, 1);
    assert_eq!(result.counts.updated, 0);

    let jane_id = researcher_id(&harness, "jane.doe@x.edu").await;
    let entry = db::enrichment_queue::queue_entry(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, "pending");
    let jane = db::researchers::get_researcher(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jane.h_index, None);
    assert_eq!(jane.enrichment_status, EnrichmentStatus::Pending);
}

#[tokio::test]
async fn test_stop_after_hands_claims_back() {
    let sources: Vec<Arc<dyn ResearchSource>> =
        vec![Arc::new(MockResearchSource::new("openalex").with_default(bundle(5, vec![])))];
    let settings = IngestSettings {
        research_sources: vec!["openalex".to_string()],
        ..Default::default()
    };
    let harness = scraped(sources, settings).await;

    let options = JobOptions {
        mode: ExecutionMode::Full,
        stop_after: Some(2),
    };
    let stopped = harness.orchestrator.run_enrichment_batch(options).await;

    assert_eq!(stopped.status, JobStatus::Success);
    assert_eq!(stopped.stages_completed, vec![Stage::FetchBatch, Stage::DeepResearch]);
    assert_eq!(stopped.counts.found, 2);

    let jane_id = researcher_id(&harness, "jane.doe@x.edu").await;
    let entry = db::enrichment_queue::queue_entry(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, "pending");
    let jane = db::researchers::get_researcher(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jane.enrichment_status, EnrichmentStatus::Pending);

    // Both researchers are claimable again
    let full = harness.orchestrator.run_enrichment_batch(JobOptions::default()).await;
    assert_eq!(full.status, JobStatus::Success, "{:?}", full.error_message);
    assert_eq!(full.counts.found, 2);
    assert_eq!(full.counts.updated, 2);
    let entry = db::enrichment_queue::queue_entry(harness.db(), jane_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, "done");
}
