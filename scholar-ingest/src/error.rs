//! Error types for scholar-ingest
//!
//! Only configuration failures and unrecoverable store failures surface as
//! [`IngestError`] from a stage. Per-record problems travel inside stage
//! outputs as values.

use thiserror::Error;

use crate::models::JobStatus;

/// Ingest error type
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed or missing configuration (fatal to the job)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested directory unit does not exist
    #[error("Directory not found: {0}")]
    UnitNotFound(String),

    /// Selector string outside the supported grammar
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// Job lifecycle transition not permitted by the state machine
    #[error("Invalid job transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Job was cancelled while running
    #[error("Job cancelled")]
    Cancelled,

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Store failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store failure known only by its message (read back from a recording)
    #[error("{0}")]
    Store(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// scholar-common error
    #[error(transparent)]
    Common(#[from] scholar_common::Error),
}

/// Result type for ingest operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Failure reported by an external collaborator (fetch, render, research)
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {0}: {1}")]
    Status(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
