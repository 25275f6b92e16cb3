//! Resolve dynamic content: run load directives through the renderer

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::PageMarkup;
use crate::collaborators::DynamicRenderer;
use crate::models::{DynamicLoad, FetchMethod, SourceError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicInput {
    pub method: FetchMethod,
    pub directive: Option<DynamicLoad>,
    pub pages: Vec<PageMarkup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedContent {
    pub pages: Vec<PageMarkup>,
    /// Interactions performed across all pages
    pub interactions: u32,
    pub errors: Vec<SourceError>,
}

/// Static pages without a directive pass through untouched. Everything else
/// goes to the renderer; a page the renderer fails on keeps its fetched
/// markup and contributes a per-source error.
pub async fn resolve_dynamic(renderer: &dyn DynamicRenderer, input: &DynamicInput) -> ResolvedContent {
    if input.method == FetchMethod::Static && input.directive.is_none() {
        return ResolvedContent {
            pages: input.pages.clone(),
            ..Default::default()
        };
    }

    let mut out = ResolvedContent::default();
    for page in &input.pages {
        match renderer
            .resolve(&page.url, &page.markup, input.directive.as_ref())
            .await
        {
            Ok(rendered) => {
                out.interactions += rendered.interactions;
                out.pages.push(PageMarkup {
                    url: page.url.clone(),
                    markup: rendered.markup,
                });
            }
            Err(e) => {
                warn!(url = %page.url, error = %e, "Render failed, keeping fetched markup");
                out.errors.push(SourceError::new(&page.url, e.to_string()));
                out.pages.push(page.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockRenderer;

    fn page() -> PageMarkup {
        PageMarkup {
            url: "https://x.edu/people".to_string(),
            markup: "<ul></ul>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_static_without_directive_passes_through() {
        let renderer = MockRenderer::new("<li>extra</li>", 3);
        let input = DynamicInput {
            method: FetchMethod::Static,
            directive: None,
            pages: vec![page()],
        };
        let out = resolve_dynamic(&renderer, &input).await;
        assert_eq!(out.pages, vec![page()]);
        assert_eq!(out.interactions, 0);
    }

    #[tokio::test]
    async fn test_directive_routes_through_renderer() {
        let renderer = MockRenderer::new("<li>extra</li>", 3);
        let input = DynamicInput {
            method: FetchMethod::Static,
            directive: Some(DynamicLoad::ScrollToBottom { max_scrolls: 2 }),
            pages: vec![page(), page()],
        };
        let out = resolve_dynamic(&renderer, &input).await;
        assert_eq!(out.interactions, 6);
        assert!(out.pages[0].markup.ends_with("<li>extra</li>"));
    }

    #[tokio::test]
    async fn test_render_failure_keeps_markup() {
        let input = DynamicInput {
            method: FetchMethod::Rendered,
            directive: None,
            pages: vec![page()],
        };
        let out = resolve_dynamic(&MockRenderer::failing(), &input).await;
        assert_eq!(out.pages, vec![page()]);
        assert_eq!(out.errors.len(), 1);
    }
}
