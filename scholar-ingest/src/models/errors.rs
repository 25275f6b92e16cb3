//! Per-record and per-source error values
//!
//! These are recorded in stage outputs; they never abort a stage.

use serde::{Deserialize, Serialize};

/// A field of one candidate that could not be parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// Index of the raw candidate within the extraction output
    pub candidate_index: usize,
    pub field: String,
    pub value: String,
    pub reason: String,
    /// True when the whole candidate was dropped (no usable name)
    pub dropped: bool,
}

/// A failure reported by one external source during a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceError {
    /// Source name or URL
    pub source: String,
    pub message: String,
}

impl SourceError {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}
