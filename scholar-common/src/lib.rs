//! # Scholar Common Library
//!
//! Shared code for the scholar ingest services including:
//! - Error types
//! - Event types (IngestEvent enum) and the broadcast event bus
//! - TOML configuration loading and root folder resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
