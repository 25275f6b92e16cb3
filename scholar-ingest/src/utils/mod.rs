//! Utility modules for scholar-ingest

pub mod db_retry;
pub mod text;

pub use db_retry::retry_on_lock;
