//! Directory units and their typed scrape configuration
//!
//! The stored `scrape_config` blob is parsed into [`ScrapeOptions`]. Every
//! option is explicit and falls back to a documented default when absent.

use serde::{Deserialize, Serialize};

/// A directory row as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryRow {
    pub id: String,
    /// Listing page URL
    pub url: String,
    /// Institution the listed researchers belong to
    pub affiliation: String,
    /// Department / school within the institution
    pub sub_unit: Option<String>,
    /// Raw JSON scrape configuration (may be empty)
    pub scrape_config: Option<String>,
    pub active: bool,
}

/// How page content is obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    /// Plain HTTP GET, no script execution
    #[default]
    Static,
    /// Routed through the render service
    Rendered,
}

/// CSS-like selectors for each field of a directory entry
///
/// Field selectors are evaluated inside each `container` match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    /// Default: `.person`
    pub container: String,
    /// Default: `.name`
    pub name: String,
    /// Default: `.title`
    pub title: String,
    /// Default: `a[href^=mailto:]`
    pub email: String,
    /// Default: `.phone`
    pub phone: String,
    /// Default: `.location`
    pub location: String,
    /// Default: `a.profile`
    pub profile_link: String,
    /// Default: `.research-area`
    pub research_areas: String,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            container: ".person".to_string(),
            name: ".name".to_string(),
            title: ".title".to_string(),
            email: "a[href^=mailto:]".to_string(),
            phone: ".phone".to_string(),
            location: ".location".to_string(),
            profile_link: "a.profile".to_string(),
            research_areas: ".research-area".to_string(),
        }
    }
}

impl SelectorSet {
    /// (field name, selector) pairs, container first
    pub fn entries(&self) -> [(&'static str, &str); 8] {
        [
            ("container", self.container.as_str()),
            ("name", self.name.as_str()),
            ("title", self.title.as_str()),
            ("email", self.email.as_str()),
            ("phone", self.phone.as_str()),
            ("location", self.location.as_str()),
            ("profile_link", self.profile_link.as_str()),
            ("research_areas", self.research_areas.as_str()),
        ]
    }
}

fn default_max_clicks() -> u32 {
    20
}

fn default_max_scrolls() -> u32 {
    10
}

fn default_wait_ms() -> u64 {
    5000
}

fn default_max_pages() -> u32 {
    10
}

fn default_page_start() -> u32 {
    1
}

/// Interaction needed before the listing is complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DynamicLoad {
    /// Click a "load more" control until it disappears
    ClickUntilExhausted {
        selector: String,
        #[serde(default = "default_max_clicks")]
        max_clicks: u32,
    },
    /// Scroll to the bottom repeatedly to trigger lazy loading
    ScrollToBottom {
        #[serde(default = "default_max_scrolls")]
        max_scrolls: u32,
    },
    /// Wait until a selector appears
    WaitFor {
        selector: String,
        #[serde(default = "default_wait_ms")]
        timeout_ms: u64,
    },
}

/// Multi-page listing traversal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Pagination {
    /// Single page (default)
    #[default]
    None,
    /// Follow the href of `selector` until absent or `max_pages` reached
    NextLink {
        selector: String,
        #[serde(default = "default_max_pages")]
        max_pages: u32,
    },
    /// Request `?{param}=N` for N in `start..start + max_pages`, stopping at
    /// the first page that fails or repeats an earlier page
    PageParameter {
        param: String,
        #[serde(default = "default_page_start")]
        start: u32,
        #[serde(default = "default_max_pages")]
        max_pages: u32,
    },
}

/// Typed per-directory scrape configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeOptions {
    pub method: FetchMethod,
    pub selectors: SelectorSet,
    /// Default: none
    pub dynamic_load: Option<DynamicLoad>,
    pub pagination: Pagination,
    /// Default: no cap
    pub max_candidates: Option<usize>,
}

/// What to fetch for one directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchTarget {
    pub url: String,
    pub method: FetchMethod,
    pub pagination: Pagination,
}

/// Output of the load-configuration stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub directory_id: String,
    pub affiliation: String,
    pub sub_unit: Option<String>,
    pub target: FetchTarget,
    pub selectors: SelectorSet,
    pub dynamic_load: Option<DynamicLoad>,
    pub max_candidates: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_blob_uses_defaults() {
        let opts: ScrapeOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, ScrapeOptions::default());
        assert_eq!(opts.selectors.container, ".person");
        assert_eq!(opts.pagination, Pagination::None);
    }

    #[test]
    fn test_partial_selectors_fall_back_per_field() {
        let opts: ScrapeOptions =
            serde_json::from_str(r#"{"selectors": {"container": "li.faculty"}}"#).unwrap();
        assert_eq!(opts.selectors.container, "li.faculty");
        assert_eq!(opts.selectors.name, ".name");
    }

    #[test]
    fn test_directives_parse_with_defaults() {
        let opts: ScrapeOptions = serde_json::from_str(
            r#"{
                "method": "rendered",
                "dynamic_load": {"kind": "click_until_exhausted", "selector": "button.more"},
                "pagination": {"mode": "page_parameter", "param": "page"}
            }"#,
        )
        .unwrap();
        assert_eq!(opts.method, FetchMethod::Rendered);
        assert_eq!(
            opts.dynamic_load,
            Some(DynamicLoad::ClickUntilExhausted {
                selector: "button.more".to_string(),
                max_clicks: 20
            })
        );
        assert_eq!(
            opts.pagination,
            Pagination::PageParameter {
                param: "page".to_string(),
                start: 1,
                max_pages: 10
            }
        );
    }
}
