//! Load configuration: directory row -> typed, validated scrape configuration

use serde::{Deserialize, Serialize};

use super::markup::Selector;
use crate::error::{IngestError, IngestResult};
use crate::models::{
    DirectoryConfig, DirectoryRow, DynamicLoad, FetchTarget, Pagination, ScrapeOptions,
};

/// Directory lookup result for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfigInput {
    pub unit_id: String,
    pub directory: Option<DirectoryRow>,
    /// Store error from the lookup; `directory` is `None` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_error: Option<String>,
}

/// Resolve the fetch target, selector set and directives for a directory
///
/// Fails with a configuration error when the unit is missing, the URL is not
/// http(s), the stored blob is malformed, or any selector is outside the
/// supported grammar. A recorded lookup error is returned as-is.
pub fn load_config(input: &LoadConfigInput) -> IngestResult<DirectoryConfig> {
    if let Some(error) = &input.lookup_error {
        return Err(IngestError::Store(error.clone()));
    }
    let row = input
        .directory
        .as_ref()
        .ok_or_else(|| IngestError::UnitNotFound(input.unit_id.clone()))?;

    let url = url::Url::parse(&row.url)
        .map_err(|e| IngestError::Config(format!("invalid directory URL '{}': {}", row.url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(IngestError::Config(format!(
            "unsupported URL scheme '{}'",
            url.scheme()
        )));
    }

    let options = parse_options(row.scrape_config.as_deref())?;

    for (_, selector) in options.selectors.entries() {
        Selector::parse(selector)?;
    }
    match &options.dynamic_load {
        Some(DynamicLoad::ClickUntilExhausted { selector, .. })
        | Some(DynamicLoad::WaitFor { selector, .. }) => {
            Selector::parse(selector)?;
        }
        Some(DynamicLoad::ScrollToBottom { .. }) | None => {}
    }
    match &options.pagination {
        Pagination::None => {}
        Pagination::NextLink {
            selector,
            max_pages,
        } => {
            Selector::parse(selector)?;
            require_pages(*max_pages)?;
        }
        Pagination::PageParameter {
            param, max_pages, ..
        } => {
            if param.trim().is_empty() {
                return Err(IngestError::Config(
                    "page_parameter pagination needs a parameter name".to_string(),
                ));
            }
            require_pages(*max_pages)?;
        }
    }
    if options.max_candidates == Some(0) {
        return Err(IngestError::Config(
            "max_candidates must be at least 1".to_string(),
        ));
    }

    Ok(DirectoryConfig {
        directory_id: row.id.clone(),
        affiliation: row.affiliation.clone(),
        sub_unit: row.sub_unit.clone(),
        target: FetchTarget {
            url: url.to_string(),
            method: options.method,
            pagination: options.pagination,
        },
        selectors: options.selectors,
        dynamic_load: options.dynamic_load,
        max_candidates: options.max_candidates,
    })
}

fn parse_options(blob: Option<&str>) -> IngestResult<ScrapeOptions> {
    match blob.map(str::trim) {
        None | Some("") => Ok(ScrapeOptions::default()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| IngestError::Config(format!("malformed scrape configuration: {}", e))),
    }
}

fn require_pages(max_pages: u32) -> IngestResult<()> {
    if max_pages == 0 {
        return Err(IngestError::Config(
            "max_pages must be at least 1".to_string(),
        ));
    }
    Ok(())
}
