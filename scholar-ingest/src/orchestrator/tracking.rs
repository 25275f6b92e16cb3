//! Per-job stage tracking wrapper

use chrono::Utc;
use scholar_common::events::IngestEvent;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ActiveJob, Orchestrator};
use crate::db;
use crate::error::{IngestError, IngestResult};
use crate::models::{CandidateRecord, Job, JobKind, JobOptions, JobResult, JobStatus, Stage};
use crate::recorder::StepRecorder;

const CANCELLED_MESSAGE: &str = "job cancelled";

/// Drives one job through its stages
///
/// Owns the job's state, its recorder and its cancellation token. Status is
/// mirrored into the orchestrator's live registry at every stage entry and,
/// in full mode, into the `jobs` table. Recorder and bookkeeping failures
/// are logged and never fail the job.
pub struct JobTracker<'a> {
    orchestrator: &'a Orchestrator,
    job: Job,
    options: JobOptions,
    recorder: Box<dyn StepRecorder>,
    cancel: CancellationToken,
    completed: Vec<Stage>,
    preview: Vec<CandidateRecord>,
}

impl<'a> JobTracker<'a> {
    /// Move a new job to `running` and register it
    pub async fn begin(
        orchestrator: &'a Orchestrator,
        kind: JobKind,
        unit_id: &str,
        options: JobOptions,
        cancel: CancellationToken,
    ) -> JobTracker<'a> {
        let mut job = Job::new(kind, unit_id);
        if let Err(e) = job.transition_to(JobStatus::Running) {
            warn!(job_id = %job.job_id, error = %e, "Unexpected start transition failure");
        }

        let recorder = orchestrator.artifacts.recorder(job.job_id);
        let tracker = JobTracker {
            orchestrator,
            job,
            options,
            recorder,
            cancel,
            completed: Vec::new(),
            preview: Vec::new(),
        };

        tracker.publish().await;
        orchestrator.event_bus.emit_lossy(IngestEvent::JobStarted {
            job_id: tracker.job.job_id,
            kind: kind.as_str().to_string(),
            unit_id: unit_id.to_string(),
            timestamp: Utc::now(),
        });
        info!(
            job_id = %tracker.job.job_id,
            kind = kind.as_str(),
            unit_id,
            mode = ?options.mode,
            "Job started"
        );

        tracker
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_mut(&mut self) -> &mut Job {
        &mut self.job
    }

    pub fn options(&self) -> JobOptions {
        self.options
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Candidates returned with a test-mode result
    pub fn set_preview(&mut self, preview: Vec<CandidateRecord>) {
        self.preview = preview;
    }

    /// True when the run was asked to stop once `stage` completes
    pub fn stop_requested(&self, stage: Stage) -> bool {
        self.options.stop_after == Some(stage.ordinal())
    }

    /// Mirror the job into the live registry and, in full mode, the store
    async fn publish(&self) {
        self.orchestrator.active_jobs.write().await.insert(
            self.job.job_id,
            ActiveJob {
                job: self.job.clone(),
                cancel: self.cancel.clone(),
            },
        );
        self.save().await;
    }

    async fn save(&self) {
        if self.options.is_test() {
            return;
        }
        if let Err(e) = db::jobs::save_job(&self.orchestrator.db, &self.job).await {
            warn!(job_id = %self.job.job_id, error = %e, "Failed to save job row");
        }
    }

    /// Run one stage with recording, events and cancellation checks
    ///
    /// **Sequence:**
    /// 1. Refuse to start when cancellation was requested
    /// 2. Set `current_step` (before running, so a failing stage still shows)
    /// 3. Snapshot the input, run the stage, snapshot output or error
    pub async fn run_stage<I, O, F, Fut>(&mut self, stage: Stage, input: &I, run: F) -> IngestResult<O>
    where
        I: Serialize,
        O: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = IngestResult<O>>,
    {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let job_id = self.job.job_id;
        self.job.enter_stage(stage)?;
        self.publish().await;
        self.orchestrator.event_bus.emit_lossy(IngestEvent::StageStarted {
            job_id,
            stage: stage.as_str().to_string(),
            timestamp: Utc::now(),
        });
        debug!(job_id = %job_id, stage = stage.as_str(), "Stage started");

        let input = serde_json::to_value(input)?;
        if let Err(e) = self.recorder.record_stage_start(stage, &input).await {
            warn!(job_id = %job_id, stage = stage.as_str(), error = %e, "Failed to record stage input");
        }

        let started = Instant::now();
        let result = run().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                let value = serde_json::to_value(&output).unwrap_or(Value::Null);
                if let Err(e) = self.recorder.record_stage_end(stage, &value, duration_ms).await {
                    warn!(job_id = %job_id, stage = stage.as_str(), error = %e, "Failed to record stage output");
                }
                self.orchestrator.event_bus.emit_lossy(IngestEvent::StageCompleted {
                    job_id,
                    stage: stage.as_str().to_string(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                debug!(job_id = %job_id, stage = stage.as_str(), duration_ms, "Stage completed");
                self.completed.push(stage);
                Ok(output)
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(record_err) = self.recorder.record_stage_error(stage, &message, duration_ms).await {
                    warn!(job_id = %job_id, stage = stage.as_str(), error = %record_err, "Failed to record stage error");
                }
                self.orchestrator.event_bus.emit_lossy(IngestEvent::StageFailed {
                    job_id,
                    stage: stage.as_str().to_string(),
                    error: message.clone(),
                    timestamp: Utc::now(),
                });
                warn!(job_id = %job_id, stage = stage.as_str(), error = %message, "Stage failed");
                Err(e)
            }
        }
    }

    /// Settle the terminal status, write the summary and deregister
    ///
    /// A requested cancellation wins over the stage outcome. Otherwise any
    /// error fails the job with its message verbatim.
    pub async fn finish(mut self, outcome: IngestResult<()>) -> JobResult {
        let job_id = self.job.job_id;

        let transition = if self.cancel.is_cancelled() || matches!(outcome, Err(IngestError::Cancelled)) {
            self.job.error_message = Some(CANCELLED_MESSAGE.to_string());
            self.job.transition_to(JobStatus::Cancelled)
        } else {
            match &outcome {
                Ok(()) => self.job.transition_to(JobStatus::Success),
                Err(e) => self.job.fail(e.to_string()),
            }
        };
        if let Err(e) = transition {
            warn!(job_id = %job_id, error = %e, "Unexpected terminal transition failure");
        }

        let mut result = JobResult::from_job(&self.job, std::mem::take(&mut self.completed));
        result.preview = std::mem::take(&mut self.preview);

        self.save().await;
        if let Err(e) = self.recorder.finalize(&result).await {
            warn!(job_id = %job_id, error = %e, "Failed to write job summary");
        }
        self.orchestrator.active_jobs.write().await.remove(&job_id);

        let counts = self.job.counts;
        self.orchestrator.event_bus.emit_lossy(IngestEvent::JobCompleted {
            job_id,
            status: self.job.status.as_str().to_string(),
            found: counts.found,
            created: counts.created,
            updated: counts.updated,
            skipped: counts.skipped,
            duration_ms: result.duration_ms.max(0) as u64,
            timestamp: Utc::now(),
        });
        info!(
            job_id = %job_id,
            unit_id = %self.job.unit_id,
            status = self.job.status.as_str(),
            found = counts.found,
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            errors = counts.errors,
            duration_ms = result.duration_ms,
            "Job finished"
        );

        result
    }
}
