//! Directory scrape pipeline

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{JobTracker, Orchestrator};
use crate::db;
use crate::db::researchers::PersistInput;
use crate::error::IngestResult;
use crate::models::{JobKind, JobOptions, JobResult, Stage};
use crate::reconcile::{reconcile_batch, ReconciliationInput};
use crate::stages::{
    extract_candidates, fetch_content, load_config, normalize_candidates, resolve_dynamic,
    DynamicInput, ExtractInput, LoadConfigInput, NormalizeInput, PageMarkup,
};

/// Researchers to queue for enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueInput {
    pub researcher_ids: Vec<Uuid>,
}

impl Orchestrator {
    /// Scrape one directory unit
    ///
    /// Never returns an error: the outcome, including a failure message, is
    /// in the [`JobResult`].
    pub async fn run_job(&self, unit_id: &str, options: JobOptions) -> JobResult {
        self.run_job_with_token(unit_id, options, CancellationToken::new())
            .await
    }

    /// Scrape one directory unit under an externally owned token
    pub async fn run_job_with_token(
        &self,
        unit_id: &str,
        options: JobOptions,
        cancel: CancellationToken,
    ) -> JobResult {
        let mut tracker =
            JobTracker::begin(self, JobKind::DirectoryScrape, unit_id, options, cancel).await;
        let outcome = self.scrape_stages(&mut tracker, unit_id).await;
        tracker.finish(outcome).await
    }

    async fn scrape_stages(&self, tracker: &mut JobTracker<'_>, unit_id: &str) -> IngestResult<()> {
        let options = tracker.options();

        // 1. Load configuration
        let lookup = db::directories::get_directory(&self.db, unit_id).await;
        let config_input = LoadConfigInput {
            unit_id: unit_id.to_string(),
            lookup_error: lookup.as_ref().err().map(|e| e.to_string()),
            directory: lookup.ok().flatten(),
        };
        let config = tracker
            .run_stage(Stage::LoadConfig, &config_input, || async { load_config(&config_input) })
            .await?;
        if tracker.stop_requested(Stage::LoadConfig) {
            return Ok(());
        }

        // 2. Fetch content
        let fetched = tracker
            .run_stage(Stage::FetchContent, &config.target, || async {
                Ok(fetch_content(self.collaborators.fetcher.as_ref(), &config.target).await)
            })
            .await?;
        tracker.job_mut().counts.errors += fetched.errors.len();
        if tracker.stop_requested(Stage::FetchContent) {
            return Ok(());
        }

        // 3. Resolve dynamic content
        let dynamic_input = DynamicInput {
            method: config.target.method,
            directive: config.dynamic_load.clone(),
            pages: fetched.pages.iter().map(PageMarkup::from).collect(),
        };
        let resolved = tracker
            .run_stage(Stage::ResolveDynamic, &dynamic_input, || async {
                Ok(resolve_dynamic(self.collaborators.renderer.as_ref(), &dynamic_input).await)
            })
            .await?;
        tracker.job_mut().counts.errors += resolved.errors.len();
        if tracker.stop_requested(Stage::ResolveDynamic) {
            return Ok(());
        }

        // 4. Extract candidates
        let extract_input = ExtractInput {
            pages: resolved.pages,
            selectors: config.selectors.clone(),
            max_candidates: config.max_candidates,
        };
        let extracted = tracker
            .run_stage(Stage::ExtractCandidates, &extract_input, || async {
                extract_candidates(&extract_input)
            })
            .await?;
        tracker.job_mut().counts.found = extracted.candidates.len();
        if tracker.stop_requested(Stage::ExtractCandidates) {
            return Ok(());
        }

        // 5. Normalize (test runs end here with a capped sample)
        let normalize_input = NormalizeInput {
            candidates: extracted.candidates,
            affiliation: config.affiliation.clone(),
            sub_unit: config.sub_unit.clone(),
            limit: options.is_test().then_some(self.settings.test_sample_size),
        };
        let normalized = tracker
            .run_stage(Stage::Normalize, &normalize_input, || async {
                Ok(normalize_candidates(&normalize_input))
            })
            .await?;
        tracker.job_mut().counts.errors += normalized.errors.len();
        if options.is_test() {
            debug!(
                job_id = %tracker.job().job_id,
                sample = normalized.records.len(),
                "Test run complete, no store writes"
            );
            tracker.set_preview(normalized.records);
            return Ok(());
        }
        if tracker.stop_requested(Stage::Normalize) {
            return Ok(());
        }

        // 6. Reconcile
        let existing = db::researchers::find_matches(&self.db, &normalized.records).await;
        let reconcile_input = ReconciliationInput {
            unit_id: unit_id.to_string(),
            existing: existing.as_ref().cloned().unwrap_or_default(),
            candidates: normalized.records,
        };
        let reconciled = tracker
            .run_stage(Stage::Reconcile, &reconcile_input, || async {
                existing?;
                Ok(reconcile_batch(&reconcile_input))
            })
            .await?;
        tracker.job_mut().counts.skipped = reconciled.skips.len();
        if tracker.stop_requested(Stage::Reconcile) {
            return Ok(());
        }

        // 7. Persist
        let persist_input = PersistInput {
            directory_id: config.directory_id.clone(),
            inserts: reconciled.inserts,
            updates: reconciled.updates,
        };
        let persisted = tracker
            .run_stage(Stage::Persist, &persist_input, || async {
                let outcome = db::researchers::persist_reconciled(&self.db, &persist_input).await?;
                if let Err(e) =
                    db::directories::mark_scraped(&self.db, &persist_input.directory_id, chrono::Utc::now()).await
                {
                    warn!(directory = %persist_input.directory_id, error = %e, "Failed to stamp scrape time");
                }
                Ok(outcome)
            })
            .await?;
        {
            let counts = &mut tracker.job_mut().counts;
            counts.created = persisted.inserted_ids.len();
            counts.updated = persisted.updated_ids.len();
            counts.skipped += persisted.skipped.len();
        }
        if tracker.stop_requested(Stage::Persist) {
            return Ok(());
        }

        // 8. Enqueue enrichment for everything written
        let enqueue_input = EnqueueInput {
            researcher_ids: persisted
                .inserted_ids
                .iter()
                .chain(persisted.updated_ids.iter())
                .copied()
                .collect(),
        };
        tracker
            .run_stage(Stage::EnqueueEnrichment, &enqueue_input, || async {
                Ok(db::enrichment_queue::enqueue(&self.db, &enqueue_input.researcher_ids).await?)
            })
            .await?;

        Ok(())
    }
}
