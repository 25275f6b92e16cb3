//! Job lifecycle state machine
//!
//! `Pending -> Running -> {Success, Failed, Cancelled}`. A pending job may
//! also be cancelled before it starts. Stage entries are only accepted while
//! running; `current_step` always names the most recently started stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::candidate::CandidateRecord;
use crate::error::{IngestError, IngestResult};

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine admits `self -> next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Which pipeline a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DirectoryScrape,
    EnrichmentBatch,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectoryScrape => "directory_scrape",
            Self::EnrichmentBatch => "enrichment_batch",
        }
    }

    /// Ordered stages of this pipeline
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Self::DirectoryScrape => &Stage::SCRAPE,
            Self::EnrichmentBatch => &Stage::ENRICHMENT,
        }
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory_scrape" => Ok(Self::DirectoryScrape),
            "enrichment_batch" => Ok(Self::EnrichmentBatch),
            other => Err(format!("unknown job kind: {}", other)),
        }
    }
}

/// Named pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LoadConfig,
    FetchContent,
    ResolveDynamic,
    ExtractCandidates,
    Normalize,
    Reconcile,
    Persist,
    EnqueueEnrichment,
    FetchBatch,
    DeepResearch,
    Merge,
    PersistEnrichment,
}

impl Stage {
    pub const SCRAPE: [Stage; 8] = [
        Stage::LoadConfig,
        Stage::FetchContent,
        Stage::ResolveDynamic,
        Stage::ExtractCandidates,
        Stage::Normalize,
        Stage::Reconcile,
        Stage::Persist,
        Stage::EnqueueEnrichment,
    ];

    pub const ENRICHMENT: [Stage; 4] = [
        Stage::FetchBatch,
        Stage::DeepResearch,
        Stage::Merge,
        Stage::PersistEnrichment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadConfig => "load_config",
            Self::FetchContent => "fetch_content",
            Self::ResolveDynamic => "resolve_dynamic",
            Self::ExtractCandidates => "extract_candidates",
            Self::Normalize => "normalize",
            Self::Reconcile => "reconcile",
            Self::Persist => "persist",
            Self::EnqueueEnrichment => "enqueue_enrichment",
            Self::FetchBatch => "fetch_batch",
            Self::DeepResearch => "deep_research",
            Self::Merge => "merge",
            Self::PersistEnrichment => "persist_enrichment",
        }
    }

    /// 1-based position within its pipeline
    pub fn ordinal(&self) -> usize {
        Self::SCRAPE
            .iter()
            .chain(Self::ENRICHMENT.iter())
            .position(|s| s == self)
            .map(|pos| if pos < Self::SCRAPE.len() { pos + 1 } else { pos - Self::SCRAPE.len() + 1 })
            .unwrap_or(0)
    }

    /// Stages that can be replayed from their recorded input
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Self::LoadConfig | Self::ExtractCandidates | Self::Normalize | Self::Reconcile | Self::Merge
        )
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::SCRAPE
            .iter()
            .chain(Self::ENRICHMENT.iter())
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// `full` performs every side effect; `test` stops after normalization on a
/// small sample and never writes to the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Full,
    Test,
}

/// Per-run options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub mode: ExecutionMode,
    /// Stop after the Nth (1-based) stage completes
    pub stop_after: Option<usize>,
}

impl JobOptions {
    pub fn test() -> Self {
        Self {
            mode: ExecutionMode::Test,
            stop_after: None,
        }
    }

    pub fn is_test(&self) -> bool {
        self.mode == ExecutionMode::Test
    }
}

/// Accumulated per-job counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub found: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Per-record and per-source errors recovered inside stages
    pub errors: usize,
}

/// Lifecycle transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub job_id: Uuid,
    pub old_status: JobStatus,
    pub new_status: JobStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// One orchestrated run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub kind: JobKind,
    /// Directory id, or the enrichment queue name
    pub unit_id: String,
    pub status: JobStatus,
    pub current_step: Option<Stage>,
    pub counts: JobCounts,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, unit_id: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind,
            unit_id: unit_id.into(),
            status: JobStatus::Pending,
            current_step: None,
            counts: JobCounts::default(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Transition to a new status, rejecting moves the state machine forbids
    pub fn transition_to(&mut self, new_status: JobStatus) -> IngestResult<StateTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(IngestError::InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        let transition = StateTransition {
            job_id: self.job_id,
            old_status: self.status,
            new_status,
            transitioned_at: now,
        };
        self.status = new_status;

        match new_status {
            JobStatus::Running => self.started_at = Some(now),
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled => {
                self.ended_at = Some(now)
            }
            JobStatus::Pending => {}
        }

        Ok(transition)
    }

    /// Record entry into a stage
    pub fn enter_stage(&mut self, stage: Stage) -> IngestResult<()> {
        if self.status != JobStatus::Running {
            return Err(IngestError::InvalidTransition {
                from: self.status,
                to: JobStatus::Running,
            });
        }
        self.current_step = Some(stage);
        Ok(())
    }

    /// Mark failed with a verbatim error message
    pub fn fail(&mut self, message: impl Into<String>) -> IngestResult<StateTransition> {
        let transition = self.transition_to(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time since start (or until end, once terminal)
    pub fn elapsed_ms(&self) -> i64 {
        match self.started_at {
            Some(started) => {
                let end = self.ended_at.unwrap_or_else(Utc::now);
                (end - started).num_milliseconds().max(0)
            }
            None => 0,
        }
    }
}

/// Outcome of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub unit_id: String,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub current_step: Option<Stage>,
    pub stages_completed: Vec<Stage>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    /// Normalized candidates (test mode only)
    pub preview: Vec<CandidateRecord>,
}

impl JobResult {
    pub fn from_job(job: &Job, stages_completed: Vec<Stage>) -> Self {
        Self {
            job_id: job.job_id,
            kind: job.kind,
            unit_id: job.unit_id.clone(),
            status: job.status,
            counts: job.counts,
            current_step: job.current_step,
            stages_completed,
            error_message: job.error_message.clone(),
            duration_ms: job.elapsed_ms(),
            preview: Vec::new(),
        }
    }
}

/// Aggregate over a batch of jobs, in requested order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<JobResult>,
    /// Units never launched because the batch was cancelled
    pub not_started: Vec<String>,
    /// Jobs actually attempted
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchReport {
    pub fn from_results(results: Vec<JobResult>, not_started: Vec<String>) -> Self {
        let count = |status: JobStatus| results.iter().filter(|r| r.status == status).count();
        let successful = count(JobStatus::Success);
        let failed = count(JobStatus::Failed);
        let cancelled = count(JobStatus::Cancelled);
        Self {
            total: results.len(),
            successful,
            failed,
            cancelled,
            results,
            not_started,
        }
    }
}

/// Job status query response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub unit_id: String,
    pub status: JobStatus,
    pub current_step: Option<Stage>,
    pub elapsed_ms: i64,
    pub records_found: usize,
    pub error_message: Option<String>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            kind: job.kind,
            unit_id: job.unit_id.clone(),
            status: job.status,
            current_step: job.current_step,
            elapsed_ms: job.elapsed_ms(),
            records_found: job.counts.found,
            error_message: job.error_message.clone(),
        }
    }
}
