//! scholar-ingest library interface
//!
//! Researcher-directory ingest: scrape institutional directories into
//! candidate records, reconcile them against stored researchers, and enrich
//! stored researchers from secondary research sources.

pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod reconcile;
pub mod recorder;
pub mod stages;
pub mod utils;

pub use crate::config::IngestSettings;
pub use crate::error::{CollaboratorError, IngestError, IngestResult};
pub use crate::orchestrator::Orchestrator;
