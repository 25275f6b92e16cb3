//! Data models for scholar-ingest
//!
//! - Candidate and canonical researcher records
//! - Typed per-directory scrape configuration
//! - Enrichment bundles, merge conflicts and partial updates
//! - Job lifecycle state machine and run reports

pub mod candidate;
pub mod directory;
pub mod enrichment;
pub mod errors;
pub mod job;
pub mod researcher;

pub use candidate::{CandidateRecord, RawCandidate};
pub use directory::{
    DirectoryConfig, DirectoryRow, DynamicLoad, FetchMethod, FetchTarget, Pagination,
    ScrapeOptions, SelectorSet,
};
pub use enrichment::{
    EnrichedDataBundle, MergeConflict, MergeOutcome, Publication, ResearcherUpdate, Resolution,
};
pub use errors::{FieldError, SourceError};
pub use job::{
    BatchReport, ExecutionMode, Job, JobCounts, JobKind, JobOptions, JobResult, JobStatus,
    JobStatusView, Stage, StateTransition,
};
pub use researcher::{CanonicalRecord, EnrichmentStatus, ResearcherSummary};
