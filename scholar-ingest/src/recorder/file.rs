//! Filesystem artifact store
//!
//! Layout under the artifact root:
//!
//! ```text
//! <root>/latest                      most recently started job id
//! <root>/<job_id>/01-load_config.json
//! <root>/<job_id>/02-fetch_content.json
//! <root>/<job_id>/summary.json       written at finalize
//! ```
//!
//! Every file is replaced atomically (temp file + rename).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{open_step_mut, ArtifactStore, JobSummary, StepRecord, StepRecorder};
use crate::error::{IngestError, IngestResult};
use crate::models::{JobResult, Stage};

const SUMMARY_FILE: &str = "summary.json";
const LATEST_FILE: &str = "latest";

#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }
}

/// File name of a stage artifact
pub fn step_file_name(stage: Stage) -> String {
    format!("{:02}-{}.json", stage.ordinal(), stage.as_str())
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> IngestResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> IngestResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> IngestResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

struct FileStepRecorder {
    store: FileArtifactStore,
    job_id: Uuid,
    steps: Vec<StepRecord>,
    pointer_written: bool,
}

impl FileStepRecorder {
    async fn write_step(&self, step: &StepRecord) -> IngestResult<()> {
        let path = self.store.job_dir(self.job_id).join(step_file_name(step.stage));
        write_json_atomic(&path, step).await
    }
}

#[async_trait]
impl StepRecorder for FileStepRecorder {
    async fn record_stage_start(&mut self, stage: Stage, input: &Value) -> IngestResult<()> {
        if !self.pointer_written {
            write_atomic(
                &self.store.root.join(LATEST_FILE),
                self.job_id.to_string().as_bytes(),
            )
            .await?;
            self.pointer_written = true;
        }

        let step = StepRecord::started(self.job_id, stage, input.clone());
        self.write_step(&step).await?;
        self.steps.push(step);
        Ok(())
    }

    async fn record_stage_end(
        &mut self,
        stage: Stage,
        output: &Value,
        duration_ms: u64,
    ) -> IngestResult<()> {
        let step = open_step_mut(&mut self.steps, stage)?;
        step.completed(output.clone(), duration_ms);
        let snapshot = step.clone();
        self.write_step(&snapshot).await
    }

    async fn record_stage_error(
        &mut self,
        stage: Stage,
        error: &str,
        duration_ms: u64,
    ) -> IngestResult<()> {
        let step = open_step_mut(&mut self.steps, stage)?;
        step.failed(error, duration_ms);
        let snapshot = step.clone();
        self.write_step(&snapshot).await
    }

    async fn finalize(&mut self, result: &JobResult) -> IngestResult<()> {
        let summary = JobSummary::new(result, self.steps.clone());
        let path = self.store.job_dir(self.job_id).join(SUMMARY_FILE);
        write_json_atomic(&path, &summary).await
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    fn recorder(&self, job_id: Uuid) -> Box<dyn StepRecorder> {
        Box::new(FileStepRecorder {
            store: self.clone(),
            job_id,
            steps: Vec::new(),
            pointer_written: false,
        })
    }

    async fn list_steps(&self, job_id: Uuid) -> IngestResult<Vec<StepRecord>> {
        let dir = self.job_dir(job_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && name.starts_with(|c: char| c.is_ascii_digit()) {
                names.push(name);
            }
        }
        names.sort();

        let mut steps = Vec::with_capacity(names.len());
        for name in names {
            if let Some(step) = read_json::<StepRecord>(&dir.join(&name)).await? {
                steps.push(step);
            }
        }
        Ok(steps)
    }

    async fn load_step(&self, job_id: Uuid, stage: Stage) -> IngestResult<Option<StepRecord>> {
        read_json(&self.job_dir(job_id).join(step_file_name(stage))).await
    }

    async fn load_summary(&self, job_id: Uuid) -> IngestResult<Option<JobSummary>> {
        read_json(&self.job_dir(job_id).join(SUMMARY_FILE)).await
    }

    async fn latest_job_id(&self) -> IngestResult<Option<Uuid>> {
        match tokio::fs::read_to_string(self.root.join(LATEST_FILE)).await {
            Ok(content) => Uuid::parse_str(content.trim())
                .map(Some)
                .map_err(|e| IngestError::InvalidInput(format!("corrupt latest pointer: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, JobKind, JobStatus};
    use crate::recorder::StepStatus;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_steps_survive_without_finalize() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let job_id = Uuid::new_v4();

        {
            let mut recorder = store.recorder(job_id);
            recorder
                .record_stage_start(Stage::LoadConfig, &json!({"unit_id": "d1"}))
                .await
                .unwrap();
            recorder
                .record_stage_end(Stage::LoadConfig, &json!({"ok": true}), 4)
                .await
                .unwrap();
            recorder
                .record_stage_start(Stage::FetchContent, &json!({"url": "u"}))
                .await
                .unwrap();
            // dropped here without end or finalize
        }

        let steps = store.list_steps(job_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].stage, Stage::LoadConfig);
        assert_eq!(steps[0].output, Some(json!({"ok": true})));
        assert_eq!(steps[1].status, StepStatus::Running);
        assert!(store.load_summary(job_id).await.unwrap().is_none());
        assert_eq!(store.latest_job_id().await.unwrap(), Some(job_id));
    }

    #[tokio::test]
    async fn test_finalize_writes_summary_with_steps() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let mut job = Job::new(JobKind::DirectoryScrape, "d1");
        job.transition_to(JobStatus::Running).unwrap();

        let mut recorder = store.recorder(job.job_id);
        recorder
            .record_stage_start(Stage::LoadConfig, &json!(null))
            .await
            .unwrap();
        recorder
            .record_stage_error(Stage::LoadConfig, "Directory not found: d1", 1)
            .await
            .unwrap();
        job.fail("Directory not found: d1").unwrap();
        recorder
            .finalize(&JobResult::from_job(&job, vec![]))
            .await
            .unwrap();

        let summary = store.load_summary(job.job_id).await.unwrap().unwrap();
        assert_eq!(summary.status, JobStatus::Failed);
        assert_eq!(summary.steps.len(), 1);
        assert_eq!(
            summary.steps[0].error.as_deref(),
            Some("Directory not found: d1")
        );

        let step = store
            .load_step(job.job_id, Stage::LoadConfig)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step, summary.steps[0]);
    }

    #[tokio::test]
    async fn test_end_without_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let mut recorder = store.recorder(Uuid::new_v4());
        assert!(recorder
            .record_stage_end(Stage::Merge, &json!({}), 0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_job_has_no_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path());
        assert!(store.list_steps(Uuid::new_v4()).await.unwrap().is_empty());
        assert_eq!(store.latest_job_id().await.unwrap(), None);
    }
}
