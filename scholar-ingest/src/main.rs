//! scholar-ingest - researcher directory ingest
//!
//! Scrapes configured directories into the researcher store, runs
//! enrichment batches over the queue, and sweeps stale jobs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scholar_common::config::{self, TomlConfig};
use scholar_common::events::EventBus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scholar_ingest::collaborators::{
    Collaborators, DynamicRenderer, HttpFetcher, HttpRenderClient, HttpResearchSource,
    ResearchAggregator, ResearchSource, StaticRenderer,
};
use scholar_ingest::models::{ExecutionMode, JobOptions};
use scholar_ingest::recorder::FileArtifactStore;
use scholar_ingest::{IngestSettings, Orchestrator};

const MODULE_NAME: &str = "scholar-ingest";

/// Command-line arguments for scholar-ingest
#[derive(Parser, Debug)]
#[command(name = "scholar-ingest")]
#[command(about = "Researcher directory ingest and enrichment")]
#[command(version)]
struct Args {
    /// Root folder holding the database and step artifacts
    #[arg(long, env = "SCHOLAR_ROOT")]
    root: Option<String>,

    /// Preview a sample without writing to the store
    #[arg(long)]
    test: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape every active directory in batches (default)
    ScrapeAll,
    /// Scrape the named directories
    Scrape {
        #[arg(required = true)]
        units: Vec<String>,
    },
    /// Run one enrichment batch
    Enrich,
    /// Cancel stale jobs and exit
    Sweep,
}

fn init_logging(toml: &TomlConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if toml.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_collaborators(settings: &IngestSettings) -> Result<Collaborators> {
    let fetcher = HttpFetcher::new(
        &settings.user_agent,
        settings.fetch_timeout(),
        settings.requests_per_second,
    )?;

    let renderer: Arc<dyn DynamicRenderer> = match &settings.render_endpoint {
        Some(endpoint) => Arc::new(HttpRenderClient::new(endpoint, settings.fetch_timeout())?),
        None => Arc::new(StaticRenderer),
    };

    let mut sources: Vec<Arc<dyn ResearchSource>> = Vec::new();
    match &settings.research_endpoint {
        Some(endpoint) => {
            for name in &settings.research_sources {
                sources.push(Arc::new(HttpResearchSource::new(
                    name,
                    format!("{}/{}", endpoint.trim_end_matches('/'), name),
                    settings.research_api_key.clone(),
                    settings.fetch_timeout(),
                    settings.requests_per_second,
                )?));
            }
        }
        None => warn!("No research endpoint configured; enrichment will schedule retries only"),
    }

    Ok(Collaborators {
        fetcher: Arc::new(fetcher),
        renderer,
        research: Arc::new(ResearchAggregator::new(sources, settings.research_concurrency)),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Step 1: TOML config (logging comes from it)
    let config_path = config::default_config_path(MODULE_NAME)?;
    let toml = config::load_toml_config(&config_path)?;
    init_logging(&toml);

    info!("Starting {} v{}", MODULE_NAME, env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", config_path.display());

    // Step 2: Root folder and database
    let root = config::resolve_root_folder(args.root.as_deref(), config::ROOT_FOLDER_ENV, Some(&toml));
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create root folder {}", root.display()))?;
    let db_path = root.join("scholar.db");
    info!("Database: {}", db_path.display());
    let db = scholar_ingest::db::init_database_pool(&db_path).await?;

    // Step 3: Settings and collaborators
    let settings = IngestSettings::resolve(&db, &toml).await?;
    let collaborators = build_collaborators(&settings)?;
    let artifacts = Arc::new(FileArtifactStore::new(root.join("artifacts")));
    let event_bus = EventBus::new(100);

    let orchestrator = Orchestrator::new(db, event_bus, collaborators, artifacts, settings);

    // Jobs left running by an earlier process
    let swept = orchestrator.sweep_stale_jobs().await?;
    if !swept.is_empty() {
        info!(count = swept.len(), "Cancelled stale jobs");
    }

    let options = JobOptions {
        mode: if args.test { ExecutionMode::Test } else { ExecutionMode::Full },
        stop_after: None,
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight stages");
            ctrl_c.cancel();
        }
    });

    match args.command.unwrap_or(Command::ScrapeAll) {
        Command::Sweep => {}
        Command::ScrapeAll => {
            let report = orchestrator.run_all_directories(options, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Scrape { units } => {
            let width = orchestrator.settings().batch_width;
            let report = orchestrator.run_jobs(&units, width, options, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Enrich => {
            let result = orchestrator
                .run_enrichment_batch_with_token(options, cancel.child_token())
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_scrapes_everything() {
        let args = Args::try_parse_from(["scholar-ingest", "--test"]).unwrap();
        assert!(args.test);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_scrape_takes_unit_ids() {
        let args = Args::try_parse_from(["scholar-ingest", "--root", "/tmp/s", "scrape", "cs", "math"]).unwrap();
        assert_eq!(args.root.as_deref(), Some("/tmp/s"));
        match args.command {
            Some(Command::Scrape { units }) => assert_eq!(units, vec!["cs", "math"]),
            other => panic!("expected scrape, got {:?}", other),
        }
    }

    #[test]
    fn test_scrape_without_units_is_rejected() {
        assert!(Args::try_parse_from(["scholar-ingest", "scrape"]).is_err());
        assert!(Args::try_parse_from(["scholar-ingest", "enrich", "extra"]).is_err());
    }
}
