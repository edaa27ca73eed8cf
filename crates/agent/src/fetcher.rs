//! Spec lookup chain: memory, local cache, registry, direct fetch.
//!
//! [`SpecResolver::resolve`] consults each tier only when the previous one misses. Network tiers
//! run under a timeout and a [`CancellationToken`]; the memory and cache tiers are synchronous.
//! Whatever a network tier produces is written back to the cache store and then to memory.

use crate::cache::{CacheEntry, CacheStore};
use crate::config::{DEFAULT_MAX_AGE_DAYS, HashPolicy};
use crate::error::{AgentError, Result};
use crate::registry::RegistryClient;
use async_trait::async_trait;
use chrono::Utc;
use ocp_http_tools::{HttpExecutor, HttpRequest, HttpToolsError, ReqwestExecutor};
use ocp_openapi_tools::{ApiSpec, GenerateOptions, OpenApiToolsError, generate, verify_spec_hash};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads raw `OpenAPI` documents.
#[async_trait]
pub trait SpecFetcher: Send + Sync {
    /// # Errors
    ///
    /// [`AgentError::SpecFetch`] when the document cannot be retrieved.
    async fn fetch(&self, location: &str, cancel: &CancellationToken) -> Result<String>;
}

/// Fetches `http(s)` URLs with reqwest and reads anything else from disk.
#[derive(Debug, Clone, Default)]
pub struct HttpSpecFetcher {
    executor: ReqwestExecutor,
}

impl HttpSpecFetcher {
    #[must_use]
    pub fn new(executor: ReqwestExecutor) -> Self {
        Self { executor }
    }
}

fn fetch_error(location: &str, message: impl fmt::Display) -> AgentError {
    AgentError::SpecFetch {
        url: location.to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl SpecFetcher for HttpSpecFetcher {
    async fn fetch(&self, location: &str, cancel: &CancellationToken) -> Result<String> {
        if !is_http_url(location) {
            let path = match location.strip_prefix("file://") {
                Some(rest) => PathBuf::from(rest),
                None => PathBuf::from(location),
            };
            tracing::info!("Loading OpenAPI spec from {}", path.display());
            return tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| fetch_error(location, e));
        }

        let url = Url::parse(location).map_err(|e| fetch_error(location, e))?;
        tracing::info!("Fetching OpenAPI spec from {}", ocp_http_tools::redact_url(&url));
        let resp = match self.executor.execute(HttpRequest::get(url), cancel).await {
            Ok(resp) => resp,
            Err(HttpToolsError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => return Err(fetch_error(location, e)),
        };
        if !resp.is_success() {
            return Err(fetch_error(location, format!("HTTP {}", resp.status)));
        }
        String::from_utf8(resp.body).map_err(|e| fetch_error(location, e))
    }
}

fn is_http_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Per-call inputs to [`SpecResolver::resolve`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Explicit document location. When set, the registry is skipped.
    pub spec_url: Option<String>,
    pub base_url: Option<String>,
    /// Memory and cache TTL; `0` bypasses both.
    pub max_age_days: u32,
    pub spec_hash: Option<String>,
    pub hash_policy: HashPolicy,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            spec_url: None,
            base_url: None,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            spec_hash: None,
            hash_policy: HashPolicy::default(),
        }
    }
}

/// Which tier answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecTier {
    Memory,
    Cache,
    Registry,
    Network,
}

impl SpecTier {
    #[must_use]
    pub fn is_network(self) -> bool {
        matches!(self, SpecTier::Registry | SpecTier::Network)
    }
}

impl fmt::Display for SpecTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpecTier::Memory => "memory",
            SpecTier::Cache => "cache",
            SpecTier::Registry => "registry",
            SpecTier::Network => "network",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSpec {
    pub spec: Arc<ApiSpec>,
    pub tier: SpecTier,
    /// `registry:<name>`, the document URL, or the tier name for memory/cache hits.
    pub source: String,
}

/// The four-tier lookup chain.
pub struct SpecResolver {
    memory: RwLock<HashMap<String, Arc<ApiSpec>>>,
    cache: Option<Arc<dyn CacheStore>>,
    registry: Option<Arc<dyn RegistryClient>>,
    fetcher: Arc<dyn SpecFetcher>,
    fetch_timeout: Duration,
}

impl fmt::Debug for SpecResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecResolver")
            .field("memory", &self.memory.read().keys().collect::<Vec<_>>())
            .field("cache", &self.cache.is_some())
            .field("registry", &self.registry.is_some())
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl SpecResolver {
    #[must_use]
    pub fn new(fetcher: Arc<dyn SpecFetcher>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            cache: None,
            registry: None,
            fetcher,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Resolve `name` to a generated API.
    ///
    /// # Errors
    ///
    /// - [`AgentError::ApiNotFound`] / [`AgentError::RegistryUnavailable`] when the registry
    ///   cannot supply a location and no other location is known.
    /// - [`AgentError::SpecFetch`] when the direct download fails or times out.
    /// - [`AgentError::Schema`] when the document is not a usable `OpenAPI` 3.x document.
    /// - [`AgentError::SpecHash`] on a hash mismatch under [`HashPolicy::Fail`].
    /// - [`AgentError::Cancelled`] when `cancel` fires during a network tier.
    pub async fn resolve(
        &self,
        name: &str,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSpec> {
        let bypass = options.max_age_days == 0;

        if !bypass && let Some(spec) = self.memory.read().get(name).cloned() {
            tracing::debug!(api = %name, "Spec resolved from memory");
            return Ok(ResolvedSpec {
                spec,
                tier: SpecTier::Memory,
                source: SpecTier::Memory.to_string(),
            });
        }

        let stale = if bypass {
            tracing::debug!(api = %name, "maxAgeDays is 0; bypassing memory and cache");
            self.cached_entry(name)
        } else {
            match self.cached_entry(name) {
                Some(entry) if entry.is_fresh(options.max_age_days, Utc::now()) => {
                    match self.build_from_cache(name, &entry, options) {
                        Ok(spec) => {
                            tracing::debug!(api = %name, "Spec resolved from local cache");
                            self.memory.write().insert(name.to_string(), spec.clone());
                            return Ok(ResolvedSpec {
                                spec,
                                tier: SpecTier::Cache,
                                source: SpecTier::Cache.to_string(),
                            });
                        }
                        Err(e) => {
                            tracing::debug!(api = %name, error = %e, "Cached spec unusable; treating as miss");
                            None
                        }
                    }
                }
                Some(entry) => {
                    tracing::debug!(api = %name, fetched_at = %entry.fetched_at, "Cached spec expired");
                    Some(entry)
                }
                None => None,
            }
        };

        let (location, base_url, tier, source) = match &options.spec_url {
            Some(url) => (url.clone(), options.base_url.clone(), SpecTier::Network, url.clone()),
            None => {
                let fallback = stale.as_ref().and_then(|e| e.spec_url.clone());
                match self.lookup_registry(name, cancel).await {
                    Ok(entry) => (
                        entry.openapi_url,
                        options.base_url.clone().or(entry.base_url),
                        SpecTier::Registry,
                        format!("registry:{name}"),
                    ),
                    Err(AgentError::RegistryUnavailable { url, message })
                        if fallback.is_some() =>
                    {
                        tracing::warn!(
                            api = %name,
                            "Registry at {url} unavailable ({message}); refetching the cached spec location"
                        );
                        let location = fallback.unwrap_or_default();
                        let base_url = options
                            .base_url
                            .clone()
                            .or_else(|| stale.as_ref().and_then(|e| e.base_url.clone()));
                        (location.clone(), base_url, SpecTier::Network, location)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let raw = self.fetch(&location, cancel).await?;
        let spec = Arc::new(build_spec(name, raw, &location, base_url.as_deref(), options)?);

        if let Some(cache) = &self.cache {
            let mut entry = CacheEntry::new(name, spec.raw_spec.clone(), source.clone());
            entry.spec_url = Some(location.clone());
            entry.base_url = base_url;
            if let Err(e) = cache.put(&entry) {
                tracing::warn!(api = %name, error = %e, "Failed to write spec cache entry");
            }
        }
        self.memory.write().insert(name.to_string(), spec.clone());

        tracing::info!(
            api = %name,
            tier = %tier,
            tools = spec.tools.len(),
            "Resolved spec for '{}' from {}",
            name,
            source
        );
        Ok(ResolvedSpec { spec, tier, source })
    }

    #[must_use]
    pub fn cache(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn registry(&self) -> Option<&Arc<dyn RegistryClient>> {
        self.registry.as_ref()
    }

    /// Drop `name` from memory and the cache store.
    pub fn invalidate(&self, name: &str) {
        self.memory.write().remove(name);
        if let Some(cache) = &self.cache
            && let Err(e) = cache.delete(name)
        {
            tracing::warn!(api = %name, error = %e, "Failed to delete spec cache entry");
        }
    }

    /// Names currently held in memory, sorted.
    #[must_use]
    pub fn memory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.memory.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn cached_entry(&self, name: &str) -> Option<CacheEntry> {
        let cache = self.cache.as_ref()?;
        match cache.get(name) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(api = %name, error = %e, "Unreadable cache entry; treating as miss");
                None
            }
        }
    }

    fn build_from_cache(
        &self,
        name: &str,
        entry: &CacheEntry,
        options: &ResolveOptions,
    ) -> Result<Arc<ApiSpec>> {
        let base_url = options.base_url.as_deref().or(entry.base_url.as_deref());
        let location = entry.spec_url.as_deref().unwrap_or(&entry.source);
        build_spec(name, entry.payload.clone(), location, base_url, options).map(Arc::new)
    }

    async fn lookup_registry(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<crate::registry::RegistryEntry> {
        let Some(registry) = &self.registry else {
            return Err(AgentError::Config(format!(
                "API '{name}' has no spec URL and no registry is configured"
            )));
        };
        match bounded(self.fetch_timeout, cancel, registry.lookup(name, cancel)).await {
            Bounded::Done(result) => result,
            Bounded::TimedOut => Err(AgentError::RegistryUnavailable {
                url: "registry".to_string(),
                message: format!("lookup timed out after {:?}", self.fetch_timeout),
            }),
            Bounded::Cancelled => Err(AgentError::Cancelled),
        }
    }

    async fn fetch(&self, location: &str, cancel: &CancellationToken) -> Result<String> {
        match bounded(self.fetch_timeout, cancel, self.fetcher.fetch(location, cancel)).await {
            Bounded::Done(result) => result,
            Bounded::TimedOut => Err(fetch_error(
                location,
                format!("timed out after {:?}", self.fetch_timeout),
            )),
            Bounded::Cancelled => Err(AgentError::Cancelled),
        }
    }
}

enum Bounded<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

async fn bounded<T>(
    timeout: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Bounded<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Bounded::Cancelled,
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(v) => Bounded::Done(v),
            Err(_) => Bounded::TimedOut,
        },
    }
}

fn build_spec(
    name: &str,
    raw: String,
    location: &str,
    base_url: Option<&str>,
    options: &ResolveOptions,
) -> Result<ApiSpec> {
    if let Some(expected) = &options.spec_hash {
        match verify_spec_hash(&raw, expected) {
            Ok(()) => {}
            Err(OpenApiToolsError::SpecHash { expected, actual }) => match options.hash_policy {
                HashPolicy::Fail => {
                    return Err(AgentError::SpecHash {
                        api: name.to_string(),
                        expected,
                        actual,
                    });
                }
                HashPolicy::Warn => tracing::warn!(
                    "Spec hash mismatch for '{}'. Expected: {}, Got: {}",
                    name,
                    expected,
                    actual
                ),
                HashPolicy::Ignore => {}
            },
            Err(other) => {
                return Err(AgentError::Schema {
                    api: name.to_string(),
                    source: other,
                });
            }
        }
    }

    let generate_options = GenerateOptions {
        base_url: base_url.map(str::to_string),
        spec_url: is_http_url(location).then(|| location.to_string()),
    };
    let generated = generate(&raw, &generate_options).map_err(|source| AgentError::Schema {
        api: name.to_string(),
        source,
    })?;
    Ok(ApiSpec::from_generated(name, raw, generated))
}
