//! Runtime settings resolution
//!
//! Every tunable resolves with priority Database → ENV → TOML → compiled
//! default. A value found in more than one tier is logged as a warning since
//! the lower tiers are then silently ignored.

use scholar_common::config::TomlConfig;
use scholar_common::{Error, Result};
use sqlx::SqlitePool;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::enrichment_queue::RetryPolicy;
use crate::db::settings::get_setting;

pub const DEFAULT_BATCH_WIDTH: usize = 3;
pub const DEFAULT_ENRICHMENT_BATCH_SIZE: usize = 10;
pub const DEFAULT_TEST_SAMPLE_SIZE: usize = 5;
pub const DEFAULT_STALE_JOB_MINUTES: i64 = 60;
pub const DEFAULT_MAX_ENRICHMENT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE_MINUTES: i64 = 15;
pub const DEFAULT_RESEARCH_CONCURRENCY: usize = 4;
pub const DEFAULT_USER_AGENT: &str = concat!("scholar-ingest/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 2;

/// Resolved settings for one service run
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    /// Directory jobs launched together
    pub batch_width: usize,
    pub enrichment_batch_size: usize,
    /// Candidate cap for test-mode runs
    pub test_sample_size: usize,
    pub stale_job_minutes: i64,
    pub max_enrichment_attempts: u32,
    pub retry_base_minutes: i64,
    pub research_concurrency: usize,
    pub research_sources: Vec<String>,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    pub requests_per_second: u32,
    pub research_endpoint: Option<String>,
    pub research_api_key: Option<String>,
    pub render_endpoint: Option<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_width: DEFAULT_BATCH_WIDTH,
            enrichment_batch_size: DEFAULT_ENRICHMENT_BATCH_SIZE,
            test_sample_size: DEFAULT_TEST_SAMPLE_SIZE,
            stale_job_minutes: DEFAULT_STALE_JOB_MINUTES,
            max_enrichment_attempts: DEFAULT_MAX_ENRICHMENT_ATTEMPTS,
            retry_base_minutes: DEFAULT_RETRY_BASE_MINUTES,
            research_concurrency: DEFAULT_RESEARCH_CONCURRENCY,
            research_sources: default_sources(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            research_endpoint: None,
            research_api_key: None,
            render_endpoint: None,
        }
    }
}

fn default_sources() -> Vec<String> {
    vec!["openalex".to_string(), "orcid".to_string()]
}

/// Comma-separated list as stored in the settings table or an env var
#[derive(Debug, Clone, PartialEq)]
struct NameList(Vec<String>);

impl FromStr for NameList {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let names: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            Err("empty list".to_string())
        } else {
            Ok(NameList(names))
        }
    }
}

impl Display for NameList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

fn env_value<T>(env_name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(env_name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid {}: {}", env_name, e))),
        _ => Ok(None),
    }
}

/// Resolve one tunable across the tiers; `None` when no tier has it
async fn resolve_tier<T>(
    db: &SqlitePool,
    key: &str,
    toml_value: Option<T>,
) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let env_name = format!("SCHOLAR_{}", key.to_ascii_uppercase());
    let db_value = get_setting::<T>(db, key).await?;
    let env_value = env_value::<T>(&env_name)?;

    let sources: Vec<&str> = [
        db_value.is_some().then_some("database"),
        env_value.is_some().then_some("environment"),
        toml_value.is_some().then_some("TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "Setting '{}' found in multiple sources: {}. Using {} (highest priority).",
            key,
            sources.join(", "),
            sources[0]
        );
    }

    Ok(db_value.or(env_value).or(toml_value))
}

fn at_least_one<T: PartialOrd + From<u8> + Display>(name: &str, value: T) -> Result<T> {
    if value < T::from(1u8) {
        return Err(Error::Config(format!("{} must be at least 1 (got {})", name, value)));
    }
    Ok(value)
}

impl IngestSettings {
    /// Resolve from the settings table, `SCHOLAR_*` variables and TOML
    pub async fn resolve(db: &SqlitePool, toml: &TomlConfig) -> Result<Self> {
        let orchestrator = &toml.orchestrator;
        let defaults = Self::default();

        let settings = Self {
            batch_width: resolve_tier(db, "batch_width", orchestrator.batch_width)
                .await?
                .unwrap_or(defaults.batch_width),
            enrichment_batch_size: resolve_tier(
                db,
                "enrichment_batch_size",
                orchestrator.enrichment_batch_size,
            )
            .await?
            .unwrap_or(defaults.enrichment_batch_size),
            test_sample_size: resolve_tier(db, "test_sample_size", orchestrator.test_sample_size)
                .await?
                .unwrap_or(defaults.test_sample_size),
            stale_job_minutes: resolve_tier(db, "stale_job_minutes", orchestrator.stale_job_minutes)
                .await?
                .unwrap_or(defaults.stale_job_minutes),
            max_enrichment_attempts: resolve_tier(
                db,
                "max_enrichment_attempts",
                orchestrator.max_enrichment_attempts,
            )
            .await?
            .unwrap_or(defaults.max_enrichment_attempts),
            retry_base_minutes: resolve_tier(db, "retry_base_minutes", orchestrator.retry_base_minutes)
                .await?
                .unwrap_or(defaults.retry_base_minutes),
            research_concurrency: resolve_tier(
                db,
                "research_concurrency",
                toml.research.concurrency,
            )
            .await?
            .unwrap_or(defaults.research_concurrency),
            research_sources: resolve_tier(
                db,
                "research_sources",
                toml.research.sources.clone().map(NameList),
            )
            .await?
            .map(|list| list.0)
            .unwrap_or(defaults.research_sources),
            user_agent: resolve_tier(db, "user_agent", toml.fetch.user_agent.clone())
                .await?
                .unwrap_or(defaults.user_agent),
            fetch_timeout_secs: resolve_tier(db, "fetch_timeout_secs", toml.fetch.timeout_secs)
                .await?
                .unwrap_or(defaults.fetch_timeout_secs),
            requests_per_second: resolve_tier(
                db,
                "requests_per_second",
                toml.fetch.requests_per_second,
            )
            .await?
            .unwrap_or(defaults.requests_per_second),
            research_endpoint: resolve_tier(db, "research_endpoint", toml.research.endpoint.clone())
                .await?,
            research_api_key: resolve_tier(db, "research_api_key", toml.research.api_key.clone())
                .await?,
            render_endpoint: resolve_tier(db, "render_endpoint", toml.render.endpoint.clone())
                .await?,
        };

        settings.validate()?;
        info!(
            batch_width = settings.batch_width,
            enrichment_batch_size = settings.enrichment_batch_size,
            sources = %settings.research_sources.join(","),
            "Settings resolved"
        );
        Ok(settings)
    }

    /// Widths and sizes must be at least 1
    pub fn validate(&self) -> Result<()> {
        at_least_one("batch_width", self.batch_width as u64)?;
        at_least_one("enrichment_batch_size", self.enrichment_batch_size as u64)?;
        at_least_one("test_sample_size", self.test_sample_size as u64)?;
        at_least_one("stale_job_minutes", self.stale_job_minutes)?;
        at_least_one("max_enrichment_attempts", self.max_enrichment_attempts)?;
        at_least_one("retry_base_minutes", self.retry_base_minutes)?;
        at_least_one("research_concurrency", self.research_concurrency as u64)?;
        at_least_one("fetch_timeout_secs", self.fetch_timeout_secs)?;
        at_least_one("requests_per_second", self.requests_per_second)?;
        if self.research_sources.is_empty() {
            return Err(Error::Config("research_sources must name at least one source".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_enrichment_attempts,
            base_minutes: self.retry_base_minutes,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_job_minutes)
    }
}
