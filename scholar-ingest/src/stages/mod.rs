//! Stage Library
//!
//! Each stage takes a typed input and produces a typed output plus its own
//! statistics. Pure stages (configuration load, extraction, normalization)
//! never touch the store or the network, so a recorded input can be fed
//! back through them. Fetch and dynamic resolution talk to collaborators
//! and report collaborator failures as [`SourceError`] values.
//!
//! [`SourceError`]: crate::models::SourceError

pub mod config_load;
pub mod dynamic;
pub mod extract;
pub mod fetch;
pub mod markup;
pub mod normalize;

pub use config_load::{load_config, LoadConfigInput};
pub use dynamic::{resolve_dynamic, DynamicInput, ResolvedContent};
pub use extract::{extract_candidates, ExtractInput, ExtractOutput, ExtractStats};
pub use fetch::{fetch_content, FetchOutput, FetchedPage};
pub use normalize::{normalize_candidates, NormalizeInput, NormalizeOutput};

use serde::{Deserialize, Serialize};

/// Markup of one listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMarkup {
    pub url: String,
    pub markup: String,
}

impl From<&FetchedPage> for PageMarkup {
    fn from(page: &FetchedPage) -> Self {
        Self {
            url: page.content.url.clone(),
            markup: page.content.markup.clone(),
        }
    }
}
