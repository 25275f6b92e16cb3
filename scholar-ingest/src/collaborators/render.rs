//! Dynamic-content renderers

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{DynamicRenderer, RenderedContent};
use crate::error::CollaboratorError;
use crate::models::DynamicLoad;

/// Pass-through renderer for sites that need no interaction
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRenderer;

#[async_trait]
impl DynamicRenderer for StaticRenderer {
    async fn resolve(
        &self,
        url: &str,
        markup: &str,
        directive: Option<&DynamicLoad>,
    ) -> Result<RenderedContent, CollaboratorError> {
        if directive.is_some() {
            debug!(url, "Static renderer ignoring dynamic-load directive");
        }
        Ok(RenderedContent {
            markup: markup.to_string(),
            interactions: 0,
        })
    }
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    directive: Option<&'a DynamicLoad>,
}

/// Client for a remote render service
///
/// `POST {endpoint}/render` with `{url, directive}`; the service answers
/// with `{markup, interactions}`.
pub struct HttpRenderClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::NotConfigured(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DynamicRenderer for HttpRenderClient {
    async fn resolve(
        &self,
        url: &str,
        _markup: &str,
        directive: Option<&DynamicLoad>,
    ) -> Result<RenderedContent, CollaboratorError> {
        let response = self
            .client
            .post(format!("{}/render", self.endpoint))
            .json(&RenderRequest { url, directive })
            .send()
            .await
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Status(status.as_u16(), url.to_string()));
        }

        response
            .json::<RenderedContent>()
            .await
            .map_err(|e| CollaboratorError::Parse(e.to_string()))
    }
}
