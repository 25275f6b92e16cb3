//! Enrichment pipeline

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{JobTracker, Orchestrator};
use crate::collaborators::ResearchOutcome;
use crate::db;
use crate::db::enrichment_queue::{ClaimedBatch, RetryOutcome};
use crate::db::researchers::EnrichmentWrite;
use crate::error::IngestResult;
use crate::merge::{merge_batch, MergeInput, MergeItem};
use crate::models::{JobKind, JobOptions, JobResult, MergeOutcome, ResearcherSummary, Stage};

/// Unit id recorded for enrichment jobs
pub const ENRICHMENT_UNIT: &str = "enrichment_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub size: usize,
    /// Look without claiming (test runs)
    pub peek: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub researchers: Vec<ResearcherSummary>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub researcher_id: Uuid,
    pub outcome: ResearchOutcome,
}

/// A researcher every source failed for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFailure {
    pub researcher_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistEnrichmentInput {
    pub outcomes: Vec<MergeOutcome>,
    pub failures: Vec<ResearchFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistEnrichmentOutput {
    pub writes: Vec<EnrichmentWrite>,
    pub retries: Vec<RetryOutcome>,
}

impl Orchestrator {
    /// Enrich one batch of queued researchers
    pub async fn run_enrichment_batch(&self, options: JobOptions) -> JobResult {
        self.run_enrichment_batch_with_token(options, CancellationToken::new())
            .await
    }

    pub async fn run_enrichment_batch_with_token(
        &self,
        options: JobOptions,
        cancel: CancellationToken,
    ) -> JobResult {
        let mut tracker =
            JobTracker::begin(self, JobKind::EnrichmentBatch, ENRICHMENT_UNIT, options, cancel).await;

        let mut claimed: Vec<Uuid> = Vec::new();
        let outcome = self.enrichment_stages(&mut tracker, &mut claimed).await;

        // Hand back every claim persist did not settle (failure, stop-after,
        // cancellation). Settled rows are no longer `in_progress`.
        if !options.is_test() && !claimed.is_empty() {
            match db::enrichment_queue::release_claims(&self.db, &claimed).await {
                Ok(released) if released > 0 => {
                    debug!(job_id = %tracker.job().job_id, released, "Released enrichment claims")
                }
                Ok(_) => {}
                Err(e) => warn!(job_id = %tracker.job().job_id, error = %e, "Failed to release claims"),
            }
        }

        tracker.finish(outcome).await
    }

    async fn enrichment_stages(
        &self,
        tracker: &mut JobTracker<'_>,
        claimed: &mut Vec<Uuid>,
    ) -> IngestResult<()> {
        let options = tracker.options();

        // 1. Fetch batch
        let request = BatchRequest {
            size: if options.is_test() {
                self.settings
                    .enrichment_batch_size
                    .min(self.settings.test_sample_size)
            } else {
                self.settings.enrichment_batch_size
            },
            peek: options.is_test(),
        };
        let batch: ClaimedBatch = tracker
            .run_stage(Stage::FetchBatch, &request, || async {
                Ok(db::enrichment_queue::claim_batch(&self.db, request.size, Utc::now(), request.peek).await?)
            })
            .await?;
        if !request.peek {
            claimed.extend(batch.researchers.iter().map(|r| r.id));
        }
        tracker.job_mut().counts.found = batch.researchers.len();
        if batch.researchers.is_empty() {
            debug!(job_id = %tracker.job().job_id, pending = batch.total_pending, "Nothing due for enrichment");
            return Ok(());
        }
        if tracker.stop_requested(Stage::FetchBatch) {
            return Ok(());
        }

        // 2. Deep research
        let research_request = ResearchRequest {
            researchers: batch.researchers.iter().map(ResearcherSummary::from).collect(),
            sources: self.settings.research_sources.clone(),
        };
        let researched: Vec<ResearchResult> = tracker
            .run_stage(Stage::DeepResearch, &research_request, || async {
                let research = self.collaborators.research.as_ref();
                let sources = &research_request.sources;
                let results = stream::iter(research_request.researchers.iter())
                    .map(|summary| async move {
                        ResearchResult {
                            researcher_id: summary.id,
                            outcome: research.research(summary, sources).await,
                        }
                    })
                    .buffered(self.settings.research_concurrency)
                    .collect::<Vec<_>>()
                    .await;
                Ok(results)
            })
            .await?;
        tracker.job_mut().counts.errors += researched
            .iter()
            .map(|r| r.outcome.errors.len())
            .sum::<usize>();
        if tracker.stop_requested(Stage::DeepResearch) {
            return Ok(());
        }

        // 3. Merge whatever some source answered for
        let mut items = Vec::new();
        let mut failures = Vec::new();
        for (record, result) in batch.researchers.into_iter().zip(researched) {
            if result.outcome.all_failed() {
                let error = result
                    .outcome
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.source, e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                failures.push(ResearchFailure {
                    researcher_id: record.id,
                    error,
                });
            } else {
                items.push(MergeItem {
                    record,
                    bundle: result.outcome.bundle,
                });
            }
        }
        let merge_input = MergeInput {
            items,
            verified_at: Utc::now(),
        };
        let merged = tracker
            .run_stage(Stage::Merge, &merge_input, || async { Ok(merge_batch(&merge_input)) })
            .await?;
        if options.is_test() {
            debug!(job_id = %tracker.job().job_id, "Test run complete, no store writes");
            return Ok(());
        }
        if tracker.stop_requested(Stage::Merge) {
            return Ok(());
        }

        // 4. Persist enrichment
        let persist_input = PersistEnrichmentInput {
            outcomes: merged.outcomes,
            failures,
        };
        let policy = self.settings.retry_policy();
        let persisted = tracker
            .run_stage(Stage::PersistEnrichment, &persist_input, || async {
                let mut output = PersistEnrichmentOutput::default();
                for outcome in &persist_input.outcomes {
                    output
                        .writes
                        .push(db::researchers::apply_enrichment(&self.db, outcome).await?);
                }
                for failure in &persist_input.failures {
                    output.retries.push(
                        db::enrichment_queue::schedule_retry(
                            &self.db,
                            failure.researcher_id,
                            &failure.error,
                            policy,
                            Utc::now(),
                        )
                        .await?,
                    );
                }
                Ok(output)
            })
            .await?;

        let counts = &mut tracker.job_mut().counts;
        counts.updated = persisted.writes.iter().filter(|w| w.success).count();
        counts.skipped = persisted.writes.iter().filter(|w| !w.success).count();
        counts.errors += persisted.retries.len();

        Ok(())
    }
}
