use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::api::OverrideError;
use crate::models::{FeatureSegment, FeatureState, Paginated, Segment};

/// Read access to the data the override view is computed from.
#[async_trait]
pub trait OverridesApi: Send + Sync {
    /// Persisted segment overrides of a feature in an environment.
    async fn feature_segments(
        &self,
        feature: i64,
        environment: &str,
    ) -> Result<Vec<FeatureSegment>, OverrideError>;

    /// Feature states of a feature in an environment, the environment default included.
    async fn feature_states(
        &self,
        feature: i64,
        environment: &str,
    ) -> Result<Vec<FeatureState>, OverrideError>;

    async fn segments(&self, project: i64, page_size: usize)
        -> Result<Vec<Segment>, OverrideError>;
}

pub struct HttpOverridesApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpOverridesApi {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self, OverrideError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(token) = token {
            let mut value = header::HeaderValue::from_str(&format!("Token {token}"))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("segment-overrides")
            .timeout(request_timeout)
            .build()?;

        // Url::join drops the last path segment unless the base ends with a slash.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };

        Ok(HttpOverridesApi { client, base_url })
    }

    #[instrument(skip(self, query))]
    async fn get<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<T, OverrideError> {
        let mut url = self.base_url.join(resource)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let response = self.client.get(url).send().await.map_err(|e| {
            error!(resource, "request failed: {}", e);
            OverrideError::Http(e)
        })?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!(resource, status = status.as_u16(), "request rejected");
            return Err(OverrideError::FetchFailed {
                resource: resource.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| {
            error!(resource, "failed to parse response: {}", source);
            OverrideError::ResponseParsing {
                resource: resource.to_string(),
                source,
            }
        })
    }
}

#[async_trait]
impl OverridesApi for HttpOverridesApi {
    async fn feature_segments(
        &self,
        feature: i64,
        environment: &str,
    ) -> Result<Vec<FeatureSegment>, OverrideError> {
        let page: Paginated<FeatureSegment> = self
            .get(
                "features/feature-segments/",
                &[
                    ("feature", feature.to_string()),
                    ("environment", environment.to_string()),
                ],
            )
            .await?;
        debug!(count = page.results.len(), "fetched feature segments");
        Ok(page.results)
    }

    async fn feature_states(
        &self,
        feature: i64,
        environment: &str,
    ) -> Result<Vec<FeatureState>, OverrideError> {
        let page: Paginated<FeatureState> = self
            .get(
                &format!("environments/{environment}/featurestates/"),
                &[("feature", feature.to_string())],
            )
            .await?;
        debug!(count = page.results.len(), "fetched feature states");
        Ok(page.results)
    }

    async fn segments(
        &self,
        project: i64,
        page_size: usize,
    ) -> Result<Vec<Segment>, OverrideError> {
        let page: Paginated<Segment> = self
            .get(
                &format!("projects/{project}/segments/"),
                &[("page_size", page_size.to_string())],
            )
            .await?;
        if page.next.is_some() {
            // lookups past the first page fall back to the unknown segment name
            warn!(
                project,
                page_size,
                count = page.count,
                "segment catalog does not fit in one page"
            );
        }
        Ok(page.results)
    }
}
