//! Step Recorder
//!
//! Captures every stage's input and output (or error) for one job. Each
//! stage is written as its own artifact the moment it starts and again when
//! it ends, so a crashed run still leaves every reached stage loadable. A
//! job-level summary is written by `finalize`.
//!
//! Recorder failures are logged by the caller and never fail a job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::IngestResult;
use crate::models::{JobCounts, JobKind, JobResult, JobStatus, Stage};

pub mod file;
pub mod memory;
pub mod replay;

pub use file::FileArtifactStore;
pub use memory::MemoryArtifactStore;
pub use replay::{recorded_fetcher, replay_stage, verify_replay, ReplayCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

/// Snapshot of one stage execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub job_id: Uuid,
    pub stage: Stage,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn started(job_id: Uuid, stage: Stage, input: Value) -> Self {
        Self {
            job_id,
            stage,
            status: StepStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            input,
            output: None,
            error: None,
        }
    }

    fn completed(&mut self, output: Value, duration_ms: u64) {
        self.status = StepStatus::Completed;
        self.ended_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
        self.output = Some(output);
    }

    fn failed(&mut self, error: &str, duration_ms: u64) {
        self.status = StepStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
        self.error = Some(error.to_string());
    }
}

/// Job-level summary written at finalize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub unit_id: String,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub finalized_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
}

impl JobSummary {
    pub fn new(result: &JobResult, steps: Vec<StepRecord>) -> Self {
        Self {
            job_id: result.job_id,
            kind: result.kind,
            unit_id: result.unit_id.clone(),
            status: result.status,
            counts: result.counts,
            error_message: result.error_message.clone(),
            duration_ms: result.duration_ms,
            finalized_at: Utc::now(),
            steps,
        }
    }
}

/// Per-job recorder
#[async_trait]
pub trait StepRecorder: Send + Sync {
    async fn record_stage_start(&mut self, stage: Stage, input: &Value) -> IngestResult<()>;

    async fn record_stage_end(
        &mut self,
        stage: Stage,
        output: &Value,
        duration_ms: u64,
    ) -> IngestResult<()>;

    async fn record_stage_error(
        &mut self,
        stage: Stage,
        error: &str,
        duration_ms: u64,
    ) -> IngestResult<()>;

    async fn finalize(&mut self, result: &JobResult) -> IngestResult<()>;
}

/// Creates recorders and serves recorded artifacts back
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn recorder(&self, job_id: Uuid) -> Box<dyn StepRecorder>;

    /// Every recorded step of a job, in execution order
    async fn list_steps(&self, job_id: Uuid) -> IngestResult<Vec<StepRecord>>;

    async fn load_step(&self, job_id: Uuid, stage: Stage) -> IngestResult<Option<StepRecord>>;

    async fn load_summary(&self, job_id: Uuid) -> IngestResult<Option<JobSummary>>;

    /// Most recently started job
    async fn latest_job_id(&self) -> IngestResult<Option<Uuid>>;
}

/// The most recent running record for `stage`
pub(crate) fn open_step_mut(
    steps: &mut [StepRecord],
    stage: Stage,
) -> IngestResult<&mut StepRecord> {
    steps
        .iter_mut()
        .rev()
        .find(|s| s.stage == stage && s.status == StepStatus::Running)
        .ok_or_else(|| {
            crate::error::IngestError::InvalidInput(format!(
                "stage {} was not started",
                stage.as_str()
            ))
        })
}
