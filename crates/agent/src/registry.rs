//! Registry lookup (tier 3 of the lookup chain).

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use ocp_http_tools::{
    HttpExecutor, HttpRequest, HttpResponse, HttpToolsError, ReqwestExecutor, redact_url,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Maximum number of name suggestions returned with [`AgentError::ApiNotFound`].
pub const MAX_SUGGESTIONS: usize = 3;

// Names scoring below this are not worth suggesting.
const SUGGESTION_THRESHOLD: f64 = 0.4;

/// Where to find an API's document, as published by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "spec_url", alias = "specUrl")]
    pub openapi_url: String,
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
}

/// One row of a registry search.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RegistrySearchHit {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tool_count: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Results requested per search; the registry caps pages at 100.
pub const SEARCH_PAGE_SIZE: usize = 10;

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// # Errors
    ///
    /// [`AgentError::ApiNotFound`] (with suggestions) when the registry does not know `name`;
    /// [`AgentError::RegistryUnavailable`] when it cannot be reached.
    async fn lookup(&self, name: &str, cancel: &CancellationToken) -> Result<RegistryEntry>;

    /// APIs whose name, display name, description or tags match `query`.
    ///
    /// # Errors
    ///
    /// [`AgentError::RegistryUnavailable`] when the registry cannot be reached or answers
    /// with something other than a search page.
    async fn search(&self, query: &str, cancel: &CancellationToken)
    -> Result<Vec<RegistrySearchHit>>;
}

/// Client for `GET {registry}/api/v1/registry/{name}` and `GET {registry}/api/v1/search`.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    base: Url,
    executor: ReqwestExecutor,
}

#[derive(Deserialize)]
struct ListedApi {
    name: String,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<RegistrySearchHit>,
}

impl HttpRegistry {
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if `registry_url` is not an http(s) URL.
    pub fn new(registry_url: &str, executor: ReqwestExecutor) -> Result<Self> {
        let base = Url::parse(registry_url.trim_end_matches('/'))
            .map_err(|e| AgentError::Config(format!("Invalid registry URL '{registry_url}': {e}")))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(AgentError::Config(format!(
                "Invalid registry URL: {registry_url}"
            )));
        }
        Ok(Self { base, executor })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, name: Option<&str>) -> Result<Url> {
        match name {
            Some(name) => self.api_url(&["registry", name]),
            None => self.api_url(&["registry"]),
        }
    }

    // `{base}/api/v1/<segments>`, each segment percent-encoded.
    fn api_url(&self, tail: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| AgentError::Config(format!("Invalid registry URL: {}", self.base)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(tail);
        Ok(url)
    }

    fn unavailable(&self, message: impl Into<String>) -> AgentError {
        AgentError::RegistryUnavailable {
            url: redact_url(&self.base),
            message: message.into(),
        }
    }

    async fn get(&self, url: Url, cancel: &CancellationToken) -> Result<HttpResponse> {
        match self.executor.execute(HttpRequest::get(url), cancel).await {
            Ok(resp) => Ok(resp),
            Err(HttpToolsError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => Err(self.unavailable(e.to_string())),
        }
    }

    /// Every API name the registry knows, or an empty list if it cannot say.
    pub async fn list_names(&self, cancel: &CancellationToken) -> Vec<String> {
        let Ok(url) = self.endpoint(None) else {
            return Vec::new();
        };
        match self.get(url, cancel).await {
            Ok(resp) if resp.is_success() => serde_json::from_slice::<Vec<ListedApi>>(&resp.body)
                .map(|apis| apis.into_iter().map(|a| a.name).collect())
                .unwrap_or_else(|e| {
                    tracing::debug!(error = %e, "Registry list response did not parse");
                    Vec::new()
                }),
            Ok(resp) => {
                tracing::debug!(status = resp.status, "Registry list request failed");
                Vec::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "Registry list request failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RegistrySearchHit>> {
        let mut url = self.api_url(&["search"])?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("per_page", &SEARCH_PAGE_SIZE.to_string());
        let resp = self.get(url, cancel).await?;
        if !resp.is_success() {
            return Err(self.unavailable(format!("Search failed: HTTP {}", resp.status)));
        }
        let page: SearchPage = serde_json::from_slice(&resp.body)
            .map_err(|e| self.unavailable(format!("Malformed search response: {e}")))?;
        tracing::debug!(query, hits = page.results.len(), "Registry search");
        Ok(page.results)
    }

    async fn lookup(&self, name: &str, cancel: &CancellationToken) -> Result<RegistryEntry> {
        let resp = self.get(self.endpoint(Some(name))?, cancel).await?;
        if resp.status == 404 {
            let known = self.list_names(cancel).await;
            return Err(AgentError::ApiNotFound {
                name: name.to_string(),
                suggestions: suggest_names(name, &known),
            });
        }
        if !resp.is_success() {
            return Err(self.unavailable(format!("HTTP {}", resp.status)));
        }
        let entry: RegistryEntry = serde_json::from_slice(&resp.body)
            .map_err(|e| self.unavailable(format!("Malformed registry entry: {e}")))?;
        tracing::debug!(api = %name, spec_url = %entry.openapi_url, "Registry lookup succeeded");
        Ok(entry)
    }
}

/// Up to [`MAX_SUGGESTIONS`] known names closest to `name`, best first.
#[must_use]
pub fn suggest_names(name: &str, known: &[String]) -> Vec<String> {
    let needle = name.to_lowercase();
    let mut scored: Vec<(f64, &String)> = known
        .iter()
        .filter(|k| !k.eq_ignore_ascii_case(name))
        .filter_map(|k| {
            let candidate = k.to_lowercase();
            let mut score = strsim::normalized_levenshtein(&needle, &candidate);
            if candidate.contains(&needle) || needle.contains(&candidate) {
                score = score.max(0.5);
            }
            (score >= SUGGESTION_THRESHOLD).then_some((score, k))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, k)| k.clone())
        .collect()
}
