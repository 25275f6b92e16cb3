//! Test Helper Utilities
//!
//! Shared fixtures for scholar-ingest integration tests

#![allow(dead_code)]

pub mod fixtures;

pub use fixtures::{
    bundle, directory, listing_page, person_block, publication, seed_directory, DIRECTORY_URL,
};

use anyhow::Result;
use scholar_common::events::EventBus;
use scholar_ingest::collaborators::{
    Collaborators, ContentFetcher, MockFetcher, MockRenderer, ResearchAggregator, ResearchSource,
};
use scholar_ingest::recorder::MemoryArtifactStore;
use scholar_ingest::{IngestSettings, Orchestrator};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Orchestrator wired to in-memory collaborators
pub struct TestHarness {
    pub orchestrator: Orchestrator,
    pub artifacts: Arc<MemoryArtifactStore>,
}

impl TestHarness {
    pub fn db(&self) -> &SqlitePool {
        self.orchestrator.db()
    }
}

/// Install a test-friendly subscriber once per binary
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("scholar_ingest=debug")
        .with_test_writer()
        .try_init();
}

/// Harness over an in-memory database with default settings
pub async fn create_test_orchestrator(
    fetcher: MockFetcher,
    sources: Vec<Arc<dyn ResearchSource>>,
) -> Result<TestHarness> {
    create_test_orchestrator_with(Arc::new(fetcher), sources, IngestSettings::default()).await
}

pub async fn create_test_orchestrator_with(
    fetcher: Arc<dyn ContentFetcher>,
    sources: Vec<Arc<dyn ResearchSource>>,
    settings: IngestSettings,
) -> Result<TestHarness> {
    init_test_logging();
    let db = scholar_ingest::db::open_in_memory().await?;
    Ok(harness_on(db, fetcher, sources, settings))
}

/// Harness over an existing pool (to rerun against the same store)
pub fn harness_on(
    db: SqlitePool,
    fetcher: Arc<dyn ContentFetcher>,
    sources: Vec<Arc<dyn ResearchSource>>,
    settings: IngestSettings,
) -> TestHarness {
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let collaborators = Collaborators {
        fetcher,
        renderer: Arc::new(MockRenderer::new("", 0)),
        research: Arc::new(ResearchAggregator::new(sources, settings.research_concurrency)),
    };
    let orchestrator = Orchestrator::new(
        db,
        EventBus::new(100),
        collaborators,
        artifacts.clone(),
        settings,
    );
    TestHarness {
        orchestrator,
        artifacts,
    }
}
