//! Replay of recorded pure stages
//!
//! A recorded input is fed back through the stage function it came from and
//! the result compared with what was recorded. Stages that touch the network
//! or the store cannot be replayed; their recorded output is served instead
//! (see [`recorded_fetcher`]).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StepRecord;
use crate::collaborators::RecordedFetcher;
use crate::error::{IngestError, IngestResult};
use crate::models::Stage;
use crate::stages::{
    extract_candidates, load_config, normalize_candidates, ExtractInput, FetchOutput,
    LoadConfigInput, NormalizeInput,
};
use crate::{merge, reconcile};

/// Result of comparing a replay with its recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayCheck {
    pub stage: Stage,
    pub matches: bool,
    /// Recorded output, or the recorded error message as a string
    pub recorded: Value,
    pub replayed: Value,
}

fn decode<T: DeserializeOwned>(step: &StepRecord) -> IngestResult<T> {
    Ok(serde_json::from_value(step.input.clone())?)
}

/// Re-run a pure stage on its recorded input
pub fn replay_stage(step: &StepRecord) -> IngestResult<Value> {
    let output = match step.stage {
        Stage::LoadConfig => serde_json::to_value(load_config(&decode::<LoadConfigInput>(step)?)?)?,
        Stage::ExtractCandidates => {
            serde_json::to_value(extract_candidates(&decode::<ExtractInput>(step)?)?)?
        }
        Stage::Normalize => serde_json::to_value(normalize_candidates(&decode::<NormalizeInput>(step)?))?,
        Stage::Reconcile => serde_json::to_value(reconcile::reconcile_batch(&decode::<
            reconcile::ReconciliationInput,
        >(step)?))?,
        Stage::Merge => serde_json::to_value(merge::merge_batch(&decode::<merge::MergeInput>(step)?))?,
        other => {
            return Err(IngestError::InvalidInput(format!(
                "stage {} has side effects and cannot be replayed",
                other.as_str()
            )))
        }
    };
    Ok(output)
}

/// Replay and compare with the recording
///
/// A stage recorded as failed matches when the replay fails with the same
/// message.
pub fn verify_replay(step: &StepRecord) -> IngestResult<ReplayCheck> {
    if !step.stage.is_pure() {
        return Err(IngestError::InvalidInput(format!(
            "stage {} has side effects and cannot be replayed",
            step.stage.as_str()
        )));
    }

    let (recorded, replayed) = match (&step.output, &step.error) {
        (Some(output), _) => (output.clone(), replay_stage(step)?),
        (None, Some(error)) => {
            let replayed = match replay_stage(step) {
                Ok(value) => value,
                Err(e) => Value::String(e.to_string()),
            };
            (Value::String(error.clone()), replayed)
        }
        (None, None) => {
            return Err(IngestError::InvalidInput(format!(
                "stage {} has no recorded outcome",
                step.stage.as_str()
            )))
        }
    };

    Ok(ReplayCheck {
        stage: step.stage,
        matches: recorded == replayed,
        recorded,
        replayed,
    })
}

/// Build a fetcher that serves the pages captured by a fetch step
pub fn recorded_fetcher(step: &StepRecord) -> IngestResult<RecordedFetcher> {
    if step.stage != Stage::FetchContent {
        return Err(IngestError::InvalidInput(format!(
            "expected a fetch_content step, got {}",
            step.stage.as_str()
        )));
    }
    let output: FetchOutput = match &step.output {
        Some(value) => serde_json::from_value(value.clone())?,
        None => FetchOutput::default(),
    };
    Ok(RecordedFetcher::from_pages(
        output
            .pages
            .into_iter()
            .map(|page| (page.requested_url, page.content)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DirectoryRow, RawCandidate};
    use serde_json::json;
    use uuid::Uuid;

    fn completed(stage: Stage, input: Value, output: Value) -> StepRecord {
        let mut step = StepRecord::started(Uuid::new_v4(), stage, input);
        step.completed(output, 1);
        step
    }

    #[test]
    fn test_normalize_round_trip() {
        let input = NormalizeInput {
            candidates: vec![RawCandidate {
                name: Some("Doe, Jane".to_string()),
                email: Some("mailto:JANE@x.edu".to_string()),
                ..Default::default()
            }],
            affiliation: "X University".to_string(),
            sub_unit: None,
            limit: None,
        };
        let output = serde_json::to_value(normalize_candidates(&input)).unwrap();
        let step = completed(Stage::Normalize, serde_json::to_value(&input).unwrap(), output);

        let check = verify_replay(&step).unwrap();
        assert!(check.matches);
    }

    #[test]
    fn test_tampered_output_is_detected() {
        let input = NormalizeInput {
            candidates: vec![],
            affiliation: "X".to_string(),
            sub_unit: None,
            limit: None,
        };
        let step = completed(
            Stage::Normalize,
            serde_json::to_value(&input).unwrap(),
            json!({"records": [], "errors": [{"bogus": true}]}),
        );
        assert!(!verify_replay(&step).unwrap().matches);
    }

    #[test]
    fn test_failed_config_step_matches_on_message() {
        let input = LoadConfigInput {
            unit_id: "gone".to_string(),
            directory: None,
            lookup_error: None,
        };
        let mut step =
            StepRecord::started(Uuid::new_v4(), Stage::LoadConfig, serde_json::to_value(&input).unwrap());
        step.failed("Directory not found: gone", 0);
        assert!(verify_replay(&step).unwrap().matches);

        let ok_input = LoadConfigInput {
            unit_id: "d1".to_string(),
            directory: Some(DirectoryRow {
                id: "d1".to_string(),
                url: "https://x.edu/people".to_string(),
                affiliation: "X".to_string(),
                sub_unit: None,
                scrape_config: None,
                active: true,
            }),
            lookup_error: None,
        };
        let value = replay_stage(&StepRecord::started(
            Uuid::new_v4(),
            Stage::LoadConfig,
            serde_json::to_value(&ok_input).unwrap(),
        ))
        .unwrap();
        assert_eq!(value["directory_id"], json!("d1"));
    }

    #[test]
    fn test_failed_lookup_replays_same_error() {
        let message = "Database error: error returned from database: (code: 10) disk I/O error";
        let input = LoadConfigInput {
            unit_id: "cs".to_string(),
            directory: None,
            lookup_error: Some(message.to_string()),
        };
        let mut step =
            StepRecord::started(Uuid::new_v4(), Stage::LoadConfig, serde_json::to_value(&input).unwrap());
        step.failed(message, 0);

        let check = verify_replay(&step).unwrap();
        assert!(check.matches);
        assert_eq!(check.replayed, json!(message));
    }

    #[test]
    fn test_side_effect_stages_refuse_replay() {
        let step = completed(Stage::Persist, json!({}), json!({}));
        assert!(replay_stage(&step).is_err());
        assert!(verify_replay(&step).is_err());
    }
}
