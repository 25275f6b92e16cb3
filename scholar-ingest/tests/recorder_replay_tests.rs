//! Step recording and offline replay of recorded jobs

mod helpers;

use helpers::*;
use scholar_ingest::collaborators::MockFetcher;
use scholar_ingest::models::{JobOptions, JobStatus, Stage};
use scholar_ingest::recorder::{
    recorded_fetcher, verify_replay, ArtifactStore, FileArtifactStore, StepStatus,
};
use scholar_ingest::IngestSettings;
use std::sync::Arc;
use tempfile::TempDir;

fn listing() -> MockFetcher {
    MockFetcher::new().with_page(
        DIRECTORY_URL,
        listing_page(&[
            person_block("Jane Doe", "Professor", "jane@x.edu", &["Vision"]),
            person_block("John Roe", "Lecturer", "john@x.edu", &[]),
        ]),
    )
}

#[tokio::test]
async fn test_every_stage_is_recorded_and_pure_stages_replay() {
    let harness = create_test_orchestrator(listing(), vec![]).await.unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();

    let result = harness.orchestrator.run_job("cs", JobOptions::default()).await;
    assert_eq!(result.status, JobStatus::Success);

    let steps = harness.artifacts.list_steps(result.job_id).await.unwrap();
    let stages: Vec<Stage> = steps.iter().map(|s| s.stage).collect();
    assert_eq!(stages, Stage::SCRAPE.to_vec());
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));

    for step in steps.iter().filter(|s| s.stage.is_pure()) {
        let check = verify_replay(step).unwrap();
        assert!(check.matches, "{} replay diverged", step.stage.as_str());
    }

    let summary = harness
        .artifacts
        .load_summary(result.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.status, JobStatus::Success);
    assert_eq!(summary.steps.len(), 8);
}

#[tokio::test]
async fn test_failed_stage_records_error() {
    let harness = create_test_orchestrator(MockFetcher::new(), vec![]).await.unwrap();

    let result = harness.orchestrator.run_job("gone", JobOptions::default()).await;
    assert_eq!(result.status, JobStatus::Failed);

    let step = harness
        .artifacts
        .load_step(result.job_id, Stage::LoadConfig)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.error.as_deref(), Some("Directory not found: gone"));
    assert!(verify_replay(&step).unwrap().matches);
}

#[tokio::test]
async fn test_recorded_fetch_reruns_offline() {
    let harness = create_test_orchestrator(listing(), vec![]).await.unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();
    let original = harness.orchestrator.run_job("cs", JobOptions::test()).await;

    let fetch_step = harness
        .artifacts
        .load_step(original.job_id, Stage::FetchContent)
        .await
        .unwrap()
        .unwrap();
    let offline = harness_on(
        harness.db().clone(),
        Arc::new(recorded_fetcher(&fetch_step).unwrap()),
        vec![],
        IngestSettings::default(),
    );

    let rerun = offline.orchestrator.run_job("cs", JobOptions::test()).await;

    assert_eq!(rerun.status, JobStatus::Success);
    assert_eq!(rerun.counts.errors, 0);
    assert_eq!(rerun.preview, original.preview);
}

#[tokio::test]
async fn test_file_store_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileArtifactStore::new(temp_dir.path().join("artifacts"));
    let harness = create_test_orchestrator(listing(), vec![]).await.unwrap();
    seed_directory(harness.db(), &directory("cs", DIRECTORY_URL, None))
        .await
        .unwrap();

    // Same store, file-backed recorder
    let file_backed = scholar_ingest::Orchestrator::new(
        harness.db().clone(),
        scholar_common::events::EventBus::new(16),
        scholar_ingest::collaborators::Collaborators {
            fetcher: Arc::new(listing()),
            renderer: Arc::new(scholar_ingest::collaborators::StaticRenderer),
            research: Arc::new(scholar_ingest::collaborators::ResearchAggregator::new(vec![], 1)),
        },
        Arc::new(store.clone()),
        IngestSettings::default(),
    );
    let result = file_backed.run_job("cs", JobOptions::default()).await;
    assert_eq!(result.status, JobStatus::Success);

    assert_eq!(store.latest_job_id().await.unwrap(), Some(result.job_id));
    let summary = store.load_summary(result.job_id).await.unwrap().unwrap();
    assert_eq!(summary.counts.created, 2);
    let normalize = store
        .load_step(result.job_id, Stage::Normalize)
        .await
        .unwrap()
        .unwrap();
    assert!(verify_replay(&normalize).unwrap().matches);
}
