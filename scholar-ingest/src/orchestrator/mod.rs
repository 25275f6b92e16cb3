//! Job Orchestrator
//!
//! Runs the eight-stage directory scrape pipeline and the four-stage
//! enrichment pipeline, one stage at a time per job, and many directory
//! jobs in fixed-width concurrent batches.
//!
//! # Stages
//! Scrape: load_config → fetch_content → resolve_dynamic → extract_candidates
//! → normalize → reconcile → persist → enqueue_enrichment
//!
//! Enrichment: fetch_batch → deep_research → merge → persist_enrichment
//!
//! Every stage runs through [`JobTracker::run_stage`], which records the
//! stage's input and output (or error) and keeps `current_step` on the most
//! recently started stage. A stage error aborts the rest of that job; the
//! job is marked `failed` and is not retried.
//!
//! # Lifecycle
//! `pending → running → {success, failed, cancelled}`. Cancellation is
//! cooperative: a cancelled job finishes its in-flight stage and runs no
//! further stages.

use scholar_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::Collaborators;
use crate::config::IngestSettings;
use crate::db;
use crate::error::IngestResult;
use crate::models::{Job, JobStatusView};
use crate::recorder::ArtifactStore;

mod batch;
mod enrichment;
mod scrape;
mod tracking;

pub use tracking::JobTracker;

/// A running job as seen by status queries and the stale sweep
#[derive(Clone)]
pub(crate) struct ActiveJob {
    pub(crate) job: Job,
    pub(crate) cancel: CancellationToken,
}

pub(crate) type ActiveJobs = Arc<RwLock<HashMap<Uuid, ActiveJob>>>;

/// Orchestrator service
///
/// Store, collaborators and artifact store are injected at construction;
/// separate instances share nothing.
pub struct Orchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    collaborators: Collaborators,
    artifacts: Arc<dyn ArtifactStore>,
    settings: IngestSettings,
    active_jobs: ActiveJobs,
}

impl Orchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        collaborators: Collaborators,
        artifacts: Arc<dyn ArtifactStore>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            db,
            event_bus,
            collaborators,
            artifacts,
            settings,
            active_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Current view of a job: the live registry first, then the store
    ///
    /// Test-mode runs never reach the store, so once one finishes its id
    /// resolves to `None`; callers keep the returned `JobResult` instead.
    pub async fn job_status(&self, job_id: Uuid) -> IngestResult<Option<JobStatusView>> {
        if let Some(active) = self.active_jobs.read().await.get(&job_id) {
            return Ok(Some(JobStatusView::from(&active.job)));
        }
        let stored = db::jobs::load_job(&self.db, job_id).await?;
        Ok(stored.as_ref().map(JobStatusView::from))
    }

    /// Ids of the jobs currently running in this process
    pub async fn active_job_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.active_jobs.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Request cooperative cancellation of a running job
    ///
    /// Returns false when the job is not running in this process.
    pub async fn cancel_job(&self, job_id: Uuid) -> bool {
        match self.active_jobs.read().await.get(&job_id) {
            Some(active) => {
                info!(job_id = %job_id, "Cancellation requested");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel jobs that have been running longer than the stale threshold
    ///
    /// Live jobs in this process get their tokens cancelled; rows left
    /// `running` by a crashed process are marked `cancelled` in the store.
    /// Enrichment claims older than the threshold go back to `pending`.
    pub async fn sweep_stale_jobs(&self) -> IngestResult<Vec<Uuid>> {
        let cutoff = chrono::Utc::now() - self.settings.stale_threshold();

        let mut swept: Vec<Uuid> = Vec::new();
        for (id, active) in self.active_jobs.read().await.iter() {
            if active.job.started_at.is_some_and(|started| started < cutoff) {
                warn!(job_id = %id, "Cancelling stale job");
                active.cancel.cancel();
                swept.push(*id);
            }
        }

        for id in db::jobs::cancel_stale_jobs(&self.db, cutoff).await? {
            if !swept.contains(&id) {
                warn!(job_id = %id, "Marked orphaned job cancelled");
                swept.push(id);
            }
        }

        // Queue rows claimed by those jobs
        let released = db::enrichment_queue::release_stale_claims(&self.db, cutoff).await?;
        if !released.is_empty() {
            warn!(count = released.len(), "Released stale enrichment claims");
        }

        swept.sort();
        Ok(swept)
    }
}
