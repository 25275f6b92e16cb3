//! Fixed-width concurrent batches of scrape jobs

use chrono::Utc;
use futures::future::join_all;
use scholar_common::events::IngestEvent;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Orchestrator;
use crate::db;
use crate::error::{IngestError, IngestResult};
use crate::models::{BatchReport, JobOptions};

impl Orchestrator {
    /// Scrape many units, `width` at a time
    ///
    /// **Algorithm:**
    /// 1. Split `unit_ids` into chunks of `width`
    /// 2. Launch a chunk together and await all of it before the next
    /// 3. Stop launching once `cancel` fires; unlaunched units are listed in
    ///    `not_started` and never counted as failed
    ///
    /// A failing job never cancels its siblings. Results keep request order.
    pub async fn run_jobs(
        &self,
        unit_ids: &[String],
        width: usize,
        options: JobOptions,
        cancel: &CancellationToken,
    ) -> IngestResult<BatchReport> {
        if width == 0 {
            return Err(IngestError::InvalidInput(
                "batch width must be at least 1".to_string(),
            ));
        }

        let mut results = Vec::with_capacity(unit_ids.len());
        let mut not_started = Vec::new();

        for (index, chunk) in unit_ids.chunks(width).enumerate() {
            if cancel.is_cancelled() {
                not_started.extend(unit_ids[index * width..].iter().cloned());
                warn!(remaining = not_started.len(), "Batch cancelled before launch");
                break;
            }

            let jobs = chunk
                .iter()
                .map(|unit_id| self.run_job_with_token(unit_id, options, cancel.child_token()));
            results.extend(join_all(jobs).await);
        }

        let report = BatchReport::from_results(results, not_started);
        self.event_bus.emit_lossy(IngestEvent::BatchCompleted {
            total: report.total,
            successful: report.successful,
            failed: report.failed,
            timestamp: Utc::now(),
        });
        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            cancelled = report.cancelled,
            not_started = report.not_started.len(),
            "Batch finished"
        );

        Ok(report)
    }

    /// Scrape every active directory in the store
    pub async fn run_all_directories(
        &self,
        options: JobOptions,
        cancel: &CancellationToken,
    ) -> IngestResult<BatchReport> {
        let unit_ids: Vec<String> = db::directories::list_active(&self.db)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        info!(directories = unit_ids.len(), width = self.settings.batch_width, "Scraping all directories");
        self.run_jobs(&unit_ids, self.settings.batch_width, options, cancel)
            .await
    }
}
