//! Extract candidates: pull field-level text fragments out of each entry

use serde::{Deserialize, Serialize};

use super::markup::{self, Selector};
use super::PageMarkup;
use crate::error::IngestResult;
use crate::models::{RawCandidate, SelectorSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractInput {
    pub pages: Vec<PageMarkup>,
    pub selectors: SelectorSet,
    pub max_candidates: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractStats {
    pub pages: usize,
    /// Container matches across all pages
    pub containers: usize,
    /// Containers where no field selector matched anything
    pub empty_blocks: usize,
    /// True when `max_candidates` cut the list short
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractOutput {
    pub candidates: Vec<RawCandidate>,
    pub stats: ExtractStats,
}

struct CompiledSelectors {
    container: Selector,
    name: Selector,
    title: Selector,
    email: Selector,
    phone: Selector,
    location: Selector,
    profile_link: Selector,
    research_areas: Selector,
}

impl CompiledSelectors {
    fn compile(set: &SelectorSet) -> IngestResult<Self> {
        Ok(Self {
            container: Selector::parse(&set.container)?,
            name: Selector::parse(&set.name)?,
            title: Selector::parse(&set.title)?,
            email: Selector::parse(&set.email)?,
            phone: Selector::parse(&set.phone)?,
            location: Selector::parse(&set.location)?,
            profile_link: Selector::parse(&set.profile_link)?,
            research_areas: Selector::parse(&set.research_areas)?,
        })
    }
}

/// Apply the selector set to every page, one raw candidate per container
pub fn extract_candidates(input: &ExtractInput) -> IngestResult<ExtractOutput> {
    let selectors = CompiledSelectors::compile(&input.selectors)?;
    let limit = input.max_candidates.unwrap_or(usize::MAX);
    let mut out = ExtractOutput::default();

    'pages: for (page_index, page) in input.pages.iter().enumerate() {
        out.stats.pages += 1;
        let cleaned = markup::clean(&page.markup);

        for block in markup::select(&cleaned, &selectors.container) {
            out.stats.containers += 1;

            let mut candidate = read_block(block.inner, &selectors);
            if candidate.is_empty() {
                out.stats.empty_blocks += 1;
                continue;
            }
            if out.candidates.len() >= limit {
                out.stats.truncated = true;
                break 'pages;
            }

            candidate.index = out.candidates.len();
            candidate.page = page_index;
            candidate.source_url = Some(page.url.clone());
            out.candidates.push(candidate);
        }
    }

    Ok(out)
}

fn first_text(block: &str, selector: &Selector) -> Option<String> {
    markup::select_first(block, selector)
        .map(|el| el.text())
        .filter(|t| !t.is_empty())
}

fn read_block(block: &str, selectors: &CompiledSelectors) -> RawCandidate {
    let email = markup::select_first(block, &selectors.email).and_then(|el| {
        el.attr("href")
            .filter(|href| href.to_ascii_lowercase().starts_with("mailto:"))
            .map(str::to_string)
            .or_else(|| Some(el.text()).filter(|t| !t.is_empty()))
    });

    let profile_url = markup::select_first(block, &selectors.profile_link)
        .and_then(|el| el.attr("href").map(str::to_string))
        .filter(|href| !href.trim().is_empty());

    let research_areas = markup::select(block, &selectors.research_areas)
        .iter()
        .map(|el| el.text())
        .filter(|t| !t.is_empty())
        .collect();

    RawCandidate {
        index: 0,
        page: 0,
        name: first_text(block, &selectors.name),
        title: first_text(block, &selectors.title),
        email,
        phone: first_text(block, &selectors.phone),
        location: first_text(block, &selectors.location),
        profile_url,
        research_areas,
        source_url: None,
    }
}
