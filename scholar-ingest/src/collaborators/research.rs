//! Deep research: per-source HTTP clients and the aggregating front end

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DeepResearch, ResearchOutcome, ResearchSource};
use crate::error::CollaboratorError;
use crate::models::{EnrichedDataBundle, Publication, ResearcherSummary, SourceError};
use crate::utils::text;

/// One research source behind the research service
///
/// `GET {endpoint}/sources/{name}/researchers?name=..&affiliation=..[&email=..]`
/// returns an [`EnrichedDataBundle`] document; 404 means no match.
pub struct HttpResearchSource {
    name: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
    rate_limiter: governor::DefaultDirectRateLimiter,
}

impl HttpResearchSource {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::NotConfigured(format!("HTTP client: {}", e)))?;
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            rate_limiter: governor::RateLimiter::direct(governor::Quota::per_second(per_second)),
        })
    }
}

#[async_trait]
impl ResearchSource for HttpResearchSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        researcher: &ResearcherSummary,
    ) -> Result<EnrichedDataBundle, CollaboratorError> {
        self.rate_limiter.until_ready().await;

        let mut params = vec![
            ("name", researcher.full_name.as_str()),
            ("affiliation", researcher.affiliation.as_str()),
        ];
        if let Some(email) = researcher.email.as_deref() {
            params.push(("email", email));
        }

        let mut request = self
            .client
            .get(format!("{}/sources/{}/researchers", self.endpoint, self.name))
            .query(&params);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound(researcher.full_name.clone()));
        }
        if !status.is_success() {
            return Err(CollaboratorError::Status(status.as_u16(), self.name.clone()));
        }

        response
            .json::<EnrichedDataBundle>()
            .await
            .map_err(|e| CollaboratorError::Parse(e.to_string()))
    }
}

/// Queries the requested sources concurrently and folds their answers
pub struct ResearchAggregator {
    sources: Vec<Arc<dyn ResearchSource>>,
    concurrency: usize,
}

impl ResearchAggregator {
    pub fn new(sources: Vec<Arc<dyn ResearchSource>>, concurrency: usize) -> Self {
        Self {
            sources,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl DeepResearch for ResearchAggregator {
    async fn research(&self, researcher: &ResearcherSummary, sources: &[String]) -> ResearchOutcome {
        let mut errors = Vec::new();
        let mut selected = Vec::new();
        for requested in sources {
            match self.sources.iter().find(|s| s.name() == requested) {
                Some(source) => selected.push(source.clone()),
                None => errors.push(SourceError::new(requested, "unknown research source")),
            }
        }

        let queries: Vec<_> = selected
            .into_iter()
            .map(|source| async move {
                let name = source.name().to_string();
                (name, source.query(researcher).await)
            })
            .collect();
        let answers: Vec<(String, Result<EnrichedDataBundle, CollaboratorError>)> =
            stream::iter(queries)
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut successes = Vec::new();
        for (name, answer) in answers {
            match answer {
                Ok(bundle) => successes.push((name, bundle)),
                Err(e) => {
                    warn!(researcher = %researcher.id, source = %name, error = %e, "Research source failed");
                    errors.push(SourceError::new(name, e.to_string()));
                }
            }
        }

        debug!(
            researcher = %researcher.id,
            succeeded = successes.len(),
            failed = errors.len(),
            "Deep research finished"
        );

        ResearchOutcome {
            bundle: fold_bundles(successes),
            errors,
        }
    }
}

/// Combine per-source bundles in source order
///
/// Metrics take the maximum, tags union in first-seen order, descriptive
/// fields take the first source that has them, publications are
/// de-duplicated by external id or (title, year).
pub fn fold_bundles(parts: Vec<(String, EnrichedDataBundle)>) -> EnrichedDataBundle {
    let mut out = EnrichedDataBundle::default();

    for (name, bundle) in parts {
        out.h_index = max_opt(out.h_index, bundle.h_index);
        out.citation_count = max_opt(out.citation_count, bundle.citation_count);

        for area in bundle.research_areas {
            if !out.research_areas.contains(&area) {
                out.research_areas.push(area);
            }
        }

        out.biography = out.biography.or(bundle.biography);
        out.homepage_url = out.homepage_url.or(bundle.homepage_url);
        out.scholar_profile_url = out.scholar_profile_url.or(bundle.scholar_profile_url);
        out.orcid = out.orcid.or(bundle.orcid);

        for publication in bundle.publications {
            if !out.publications.iter().any(|p| same_publication(p, &publication)) {
                out.publications.push(publication);
            }
        }

        out.sources.push(name);
    }

    out
}

fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Publication identity used for de-duplication
pub fn same_publication(a: &Publication, b: &Publication) -> bool {
    match (&a.external_id, &b.external_id) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => text::name_key(&a.title) == text::name_key(&b.title) && a.year == b.year,
    }
}
