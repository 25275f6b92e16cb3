//! In-memory artifact store for tests and dry runs

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{open_step_mut, ArtifactStore, JobSummary, StepRecord, StepRecorder};
use crate::error::{IngestError, IngestResult};
use crate::models::{JobResult, Stage};

#[derive(Debug, Default)]
struct MemoryState {
    steps: HashMap<Uuid, Vec<StepRecord>>,
    summaries: HashMap<Uuid, JobSummary>,
    latest: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> IngestResult<MutexGuard<'_, MemoryState>> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> IngestResult<MutexGuard<'_, MemoryState>> {
    state.lock().map_err(|_| {
        IngestError::Common(scholar_common::Error::Internal(
            "artifact store lock poisoned".to_string(),
        ))
    })
}

struct MemoryStepRecorder {
    job_id: Uuid,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl StepRecorder for MemoryStepRecorder {
    async fn record_stage_start(&mut self, stage: Stage, input: &Value) -> IngestResult<()> {
        let mut state = lock_state(&self.state)?;
        state.latest = Some(self.job_id);
        state
            .steps
            .entry(self.job_id)
            .or_default()
            .push(StepRecord::started(self.job_id, stage, input.clone()));
        Ok(())
    }

    async fn record_stage_end(
        &mut self,
        stage: Stage,
        output: &Value,
        duration_ms: u64,
    ) -> IngestResult<()> {
        let mut state = lock_state(&self.state)?;
        let steps = state.steps.entry(self.job_id).or_default();
        open_step_mut(steps, stage)?.completed(output.clone(), duration_ms);
        Ok(())
    }

    async fn record_stage_error(
        &mut self,
        stage: Stage,
        error: &str,
        duration_ms: u64,
    ) -> IngestResult<()> {
        let mut state = lock_state(&self.state)?;
        let steps = state.steps.entry(self.job_id).or_default();
        open_step_mut(steps, stage)?.failed(error, duration_ms);
        Ok(())
    }

    async fn finalize(&mut self, result: &JobResult) -> IngestResult<()> {
        let mut state = lock_state(&self.state)?;
        let steps = state.steps.get(&self.job_id).cloned().unwrap_or_default();
        state
            .summaries
            .insert(self.job_id, JobSummary::new(result, steps));
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn recorder(&self, job_id: Uuid) -> Box<dyn StepRecorder> {
        Box::new(MemoryStepRecorder {
            job_id,
            state: self.state.clone(),
        })
    }

    async fn list_steps(&self, job_id: Uuid) -> IngestResult<Vec<StepRecord>> {
        Ok(self.lock()?.steps.get(&job_id).cloned().unwrap_or_default())
    }

    async fn load_step(&self, job_id: Uuid, stage: Stage) -> IngestResult<Option<StepRecord>> {
        Ok(self
            .lock()?
            .steps
            .get(&job_id)
            .and_then(|steps| steps.iter().rev().find(|s| s.stage == stage).cloned()))
    }

    async fn load_summary(&self, job_id: Uuid) -> IngestResult<Option<JobSummary>> {
        Ok(self.lock()?.summaries.get(&job_id).cloned())
    }

    async fn latest_job_id(&self) -> IngestResult<Option<Uuid>> {
        Ok(self.lock()?.latest)
    }
}
