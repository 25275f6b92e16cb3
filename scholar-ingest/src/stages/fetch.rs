//! Fetch content: retrieve the listing page(s) for a fetch target
//!
//! Pagination is followed here. Collaborator failures are returned as
//! per-source errors, never raised.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::markup::{self, Selector};
use crate::collaborators::{ContentFetcher, FetchedContent};
use crate::error::CollaboratorError;
use crate::models::{FetchTarget, Pagination, SourceError};

/// One retrieved page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub requested_url: String,
    pub content: FetchedContent,
    /// Absolute http(s) links discovered on the page
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchOutput {
    pub pages: Vec<FetchedPage>,
    pub errors: Vec<SourceError>,
    pub total_ms: u64,
}

/// Fetch the target's first page and any further pages its pagination mode
/// reaches
pub async fn fetch_content(fetcher: &dyn ContentFetcher, target: &FetchTarget) -> FetchOutput {
    let started = Instant::now();
    let mut output = FetchOutput::default();

    match &target.pagination {
        Pagination::None => {
            fetch_one(fetcher, &target.url, &mut output).await;
        }
        Pagination::NextLink {
            selector,
            max_pages,
        } => {
            let next_selector = match Selector::parse(selector) {
                Ok(s) => Some(s),
                Err(e) => {
                    output
                        .errors
                        .push(SourceError::new(&target.url, e.to_string()));
                    None
                }
            };

            let mut url = Some(target.url.clone());
            let mut visited: Vec<String> = Vec::new();
            while let Some(current) = url.take() {
                if visited.len() >= *max_pages as usize || visited.contains(&current) {
                    break;
                }
                visited.push(current.clone());

                let Some(page) = fetch_one(fetcher, &current, &mut output).await else {
                    break;
                };
                url = next_selector
                    .as_ref()
                    .and_then(|sel| next_link(&page.content, sel));
            }
        }
        Pagination::PageParameter {
            param,
            start,
            max_pages,
        } => {
            for n in *start..start.saturating_add(*max_pages) {
                let Some(url) = with_query_param(&target.url, param, n) else {
                    output
                        .errors
                        .push(SourceError::new(&target.url, "cannot build page URL"));
                    break;
                };

                let is_first = n == *start;
                let result = fetcher.fetch(&url).await;
                match result {
                    Ok(content) => {
                        let repeated = output
                            .pages
                            .iter()
                            .any(|p| p.content.digest == content.digest);
                        if repeated {
                            debug!(url = %url, "Page repeats an earlier page, stopping");
                            break;
                        }
                        output.pages.push(page_from(url, content));
                    }
                    Err(CollaboratorError::Status(404, _)) if !is_first => {
                        debug!(url = %url, "Past the last page");
                        break;
                    }
                    Err(e) => {
                        output.errors.push(SourceError::new(&url, e.to_string()));
                        break;
                    }
                }
            }
        }
    }

    output.total_ms = started.elapsed().as_millis() as u64;
    output
}

async fn fetch_one<'a>(
    fetcher: &dyn ContentFetcher,
    url: &str,
    output: &'a mut FetchOutput,
) -> Option<&'a FetchedPage> {
    match fetcher.fetch(url).await {
        Ok(content) => {
            output.pages.push(page_from(url.to_string(), content));
            output.pages.last()
        }
        Err(e) => {
            output.errors.push(SourceError::new(url, e.to_string()));
            None
        }
    }
}

fn page_from(requested_url: String, content: FetchedContent) -> FetchedPage {
    let links = markup::links(&markup::clean(&content.markup), &content.url);
    FetchedPage {
        requested_url,
        content,
        links,
    }
}

fn next_link(content: &FetchedContent, selector: &Selector) -> Option<String> {
    let cleaned = markup::clean(&content.markup);
    let href = markup::select_first(&cleaned, selector)?
        .attr("href")?
        .to_string();
    let base = url::Url::parse(&content.url).ok();
    markup::resolve_url(base.as_ref(), &href)
}

fn with_query_param(base: &str, param: &str, value: u32) -> Option<String> {
    let mut url = url::Url::parse(base).ok()?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(param, &value.to_string());
    }
    Some(url.to_string())
}
