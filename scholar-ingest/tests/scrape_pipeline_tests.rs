//! Directory scrape pipeline, end to end over mock collaborators

mod helpers;

use helpers::*;
use scholar_common::events::IngestEvent;
use scholar_ingest::collaborators::MockFetcher;
use scholar_ingest::db;
use scholar_ingest::models::{ExecutionMode, JobOptions, JobStatus, Stage};
use scholar_ingest::IngestSettings;
use std::sync::Arc;

fn jane(title: &str) -> String {
    person_block("Dr. Jane Doe", title, "jane.doe@x.edu", &["Machine Learning", "Vision"])
}

fn john() -> String {
    person_block("John Roe, PhD", "Lecturer", "jroe@x.edu", &[])
}

fn fetcher_for(blocks: &[String]) -> MockFetcher {
    MockFetcher::new().with_page(DIRECTORY_URL, listing_page(blocks))
}

#[tokio::test]
async fn test_full_run_inserts_and_enqueues() {
    let harness = create_test_orchestrator(fetcher_for(&[jane("Professor"), john()]), vec![])
        .await
        .unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();

    let result = harness.orchestrator.run_job("cs", JobOptions::default()).await;

    assert_eq!(result.status, JobStatus::Success, "{:?}", result.error_message);
    assert_eq!(result.stages_completed, Stage::SCRAPE.to_vec());
    assert_eq!(result.current_step, Some(Stage::EnqueueEnrichment));
    assert_eq!(result.counts.found, 2);
    assert_eq!(result.counts.created, 2);
    assert_eq!(result.counts.updated, 0);
    assert!(result.preview.is_empty());

    assert_eq!(db::researchers::count_researchers(harness.db()).await.unwrap(), 2);
    let queued: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrichment_queue WHERE status = 'pending'",
    )
    .fetch_one(harness.db())
    .await
    .unwrap();
    assert_eq!(queued, 2);

    let stored = db::jobs::load_job(harness.db(), result.job_id)
        .await
        .unwrap()
        .expect("job row");
    assert_eq!(stored.status, JobStatus::Success);
    assert_eq!(stored.counts.created, 2);

    let directory = db::directories::get_directory(harness.db(), "cs")
        .await
        .unwrap()
        .unwrap();
    assert!(directory.active);
}

#[tokio::test]
async fn test_rerun_skips_then_updates_changed_record() {
    let harness = create_test_orchestrator(fetcher_for(&[jane("Professor"), john()]), vec![])
        .await
        .unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();
    let first = harness.orchestrator.run_job("cs", JobOptions::default()).await;
    assert_eq!(first.counts.created, 2);

    // Identical listing: nothing new
    let second = harness.orchestrator.run_job("cs", JobOptions::default()).await;
    assert_eq!(second.status, JobStatus::Success);
    assert_eq!(second.counts.created, 0);
    assert_eq!(second.counts.updated, 0);
    assert_eq!(second.counts.skipped, 2);

    // Jane's title changed on the same store
    let changed = harness_on(
        harness.db().clone(),
        Arc::new(fetcher_for(&[jane("Distinguished Professor"), john()])),
        vec![],
        IngestSettings::default(),
    );
    let third = changed.orchestrator.run_job("cs", JobOptions::default()).await;
    assert_eq!(third.status, JobStatus::Success);
    assert_eq!(third.counts.created, 0);
    assert_eq!(third.counts.updated, 1);
    assert_eq!(third.counts.skipped, 1);
    assert_eq!(db::researchers::count_researchers(harness.db()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_duplicate_entries_on_one_page_insert_once() {
    let harness = create_test_orchestrator(fetcher_for(&[jane("Professor"), jane("Professor")]), vec![])
        .await
        .unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();

    let result = harness.orchestrator.run_job("cs", JobOptions::default()).await;

    assert_eq!(result.counts.found, 2);
    assert_eq!(result.counts.created, 1);
    assert_eq!(result.counts.skipped, 1);
    assert_eq!(db::researchers::count_researchers(harness.db()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_test_mode_previews_without_writes() {
    let settings = IngestSettings {
        test_sample_size: 1,
        ..Default::default()
    };
    let harness = create_test_orchestrator_with(
        Arc::new(fetcher_for(&[jane("Professor"), john()])),
        vec![],
        settings,
    )
    .await
    .unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();

    let result = harness.orchestrator.run_job("cs", JobOptions::test()).await;

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.stages_completed, Stage::SCRAPE[..5].to_vec());
    assert_eq!(result.preview.len(), 1);
    assert_eq!(result.preview[0].full_name, "Jane Doe");
    assert_eq!(result.preview[0].email.as_deref(), Some("jane.doe@x.edu"));
    assert_eq!(db::researchers::count_researchers(harness.db()).await.unwrap(), 0);
    assert!(db::jobs::load_job(harness.db(), result.job_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stop_after_stage() {
    let harness = create_test_orchestrator(fetcher_for(&[jane("Professor")]), vec![])
        .await
        .unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();

    let options = JobOptions {
        mode: ExecutionMode::Full,
        stop_after: Some(3),
    };
    let result = harness.orchestrator.run_job("cs", options).await;

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(
        result.stages_completed,
        vec![Stage::LoadConfig, Stage::FetchContent, Stage::ResolveDynamic]
    );
    assert_eq!(db::researchers::count_researchers(harness.db()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_unit_fails_at_load_config() {
    let harness = create_test_orchestrator(MockFetcher::new(), vec![]).await.unwrap();

    let result = harness.orchestrator.run_job("gone", JobOptions::default()).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.current_step, Some(Stage::LoadConfig));
    assert!(result.stages_completed.is_empty());
    assert_eq!(result.error_message.as_deref(), Some("Directory not found: gone"));
}

#[tokio::test]
async fn test_fetch_failure_is_reported_not_fatal() {
    let harness = create_test_orchestrator(MockFetcher::new().with_failure(DIRECTORY_URL), vec![])
        .await
        .unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();

    let result = harness.orchestrator.run_job("cs", JobOptions::default()).await;

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.counts.found, 0);
    assert_eq!(result.counts.errors, 1);
}

#[tokio::test]
async fn test_events_bracket_the_job() {
    let harness = create_test_orchestrator(fetcher_for(&[jane("Professor")]), vec![])
        .await
        .unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();
    let mut rx = harness.orchestrator.event_bus().subscribe();

    let result = harness.orchestrator.run_job("cs", JobOptions::default()).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(IngestEvent::JobStarted { .. })));
    match events.last() {
        Some(IngestEvent::JobCompleted { job_id, status, created, .. }) => {
            assert_eq!(*job_id, result.job_id);
            assert_eq!(status, "success");
            assert_eq!(*created, 1);
        }
        other => panic!("expected JobCompleted, got {:?}", other),
    }
    let started = events
        .iter()
        .filter(|e| matches!(e, IngestEvent::StageStarted { .. }))
        .count();
    assert_eq!(started, 8);
}

#[tokio::test]
async fn test_store_error_during_persist_fails_job_without_writes() {
    let harness = create_test_orchestrator(fetcher_for(&[jane("Professor"), john()]), vec![])
        .await
        .unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();
    sqlx::query(
        "CREATE TRIGGER refuse_roe BEFORE INSERT ON researchers
         WHEN NEW.full_name = 'John Roe'
         BEGIN SELECT RAISE(ABORT, 'store refused write'); END",
    )
    .execute(harness.db())
    .await
    .unwrap();

    let result = harness.orchestrator.run_job("cs", JobOptions::default()).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.current_step, Some(Stage::Persist));
    assert_eq!(result.stages_completed, Stage::SCRAPE[..6].to_vec());
    assert!(result
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("store refused write")));
    assert_eq!(db::researchers::count_researchers(harness.db()).await.unwrap(), 0);

    let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrichment_queue")
        .fetch_one(harness.db())
        .await
        .unwrap();
    assert_eq!(queued, 0);
}
