//! [`OcpAgent`]: registration, discovery and context-aware invocation of `OpenAPI` tools.

use crate::cache::{CachedApiSummary, FsCacheStore, search_cache};
use crate::catalog::ToolCatalog;
use crate::config::{AgentConfig, ApiConfig, DEFAULT_MAX_AGE_DAYS};
use crate::error::{AgentError, Result};
use crate::fetcher::{HttpSpecFetcher, ResolveOptions, SpecResolver};
use crate::registry::{HttpRegistry, RegistryClient, RegistrySearchHit};
use crate::sessions::{FsSessionStore, SessionStore, SessionSummary};
use futures::future::join_all;
use ocp_context::headers::context_summary_line;
use ocp_context::{Context, context_headers, parse_context};
use ocp_http_tools::{
    AuthConfig, HttpExecutor, HttpToolsError, OutboundHttpSafety, ReqwestExecutor, build_request,
    semantics_for_method,
};
use ocp_openapi_tools::{ApiSpec, Tool, tool_documentation};
use parking_lot::{Mutex, RwLock};
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of [`OcpAgent::call_tool`]. Non-2xx statuses are results, not errors.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub api: String,
    pub tool: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ToolCallResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct OcpAgent {
    context: Mutex<Context>,
    catalog: ToolCatalog,
    resolver: SpecResolver,
    executor: Arc<dyn HttpExecutor>,
    auth: RwLock<HashMap<String, AuthConfig>>,
    sessions: Option<Arc<dyn SessionStore>>,
    default_max_age_days: u32,
}

impl fmt::Debug for OcpAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcpAgent")
            .field("context_id", &self.context.lock().context_id())
            .field("apis", &self.catalog.api_names())
            .field("resolver", &self.resolver)
            .field("sessions", &self.sessions.is_some())
            .finish_non_exhaustive()
    }
}

impl OcpAgent {
    #[must_use]
    pub fn new(context: Context, resolver: SpecResolver, executor: Arc<dyn HttpExecutor>) -> Self {
        Self {
            context: Mutex::new(context),
            catalog: ToolCatalog::new(),
            resolver,
            executor,
            auth: RwLock::new(HashMap::new()),
            sessions: None,
            default_max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }

    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// TTL used for APIs registered without their own `maxAgeDays`.
    #[must_use]
    pub fn with_default_max_age_days(mut self, days: u32) -> Self {
        self.default_max_age_days = days;
        self
    }

    /// Wire up an agent from configuration: reqwest executors, the HTTP registry client, and
    /// filesystem cache/session stores under the storage root when caching is enabled.
    ///
    /// APIs listed in the configuration are not registered here; pass `config.apis` to
    /// [`Self::register_apis`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the context cannot be created, or a
    /// store directory cannot be created.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        config.validate()?;
        let context = Context::create(
            &config.agent_type,
            config.user.as_deref(),
            config.workspace.as_deref(),
            config.goal.as_deref(),
        )?
        .with_history_limit(config.history_limit);

        let mut safety = OutboundHttpSafety::permissive();
        safety.max_response_bytes = config.max_response_bytes;
        let fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);
        let fetch_executor = ReqwestExecutor::new(fetch_timeout, safety.clone())?;
        let request_executor =
            ReqwestExecutor::new(Duration::from_secs(config.request_timeout_secs), safety)?;

        let registry = HttpRegistry::new(&config.registry_url, fetch_executor.clone())?;
        let mut resolver = SpecResolver::new(Arc::new(HttpSpecFetcher::new(fetch_executor)))
            .with_registry(Arc::new(registry))
            .with_fetch_timeout(fetch_timeout);

        let mut agent_sessions: Option<Arc<dyn SessionStore>> = None;
        if config.enable_cache {
            let root = config.storage_dir();
            resolver = resolver.with_cache(Arc::new(FsCacheStore::new(&root)?));
            agent_sessions = Some(Arc::new(FsSessionStore::new(&root)?));
            tracing::debug!(root = %root.display(), "Using local OCP storage");
        }

        let mut agent = Self::new(context, resolver, Arc::new(request_executor))
            .with_default_max_age_days(config.cache_max_age_days);
        agent.sessions = agent_sessions;
        Ok(agent)
    }

    /// Resolve, generate and register one API.
    ///
    /// # Errors
    ///
    /// Any [`SpecResolver::resolve`] error. The catalog and context are untouched on failure.
    pub async fn register_api(
        &self,
        api: &ApiConfig,
        cancel: &CancellationToken,
    ) -> Result<Arc<ApiSpec>> {
        let options = ResolveOptions {
            spec_url: api.spec_url.clone(),
            base_url: api.base_url.clone(),
            max_age_days: api.max_age_days.unwrap_or(self.default_max_age_days),
            spec_hash: api.spec_hash.clone(),
            hash_policy: api.spec_hash_policy,
        };
        let resolved = self.resolver.resolve(&api.name, &options, cancel).await?;
        let spec = resolved.spec;

        {
            let mut auth = self.auth.write();
            match &api.auth {
                Some(a) => auth.insert(api.name.clone(), a.clone()),
                None => auth.remove(&api.name),
            };
        }
        if let Some(previous) = self.catalog.insert(spec.clone())
            && previous.spec_hash != spec.spec_hash
        {
            tracing::info!(api = %api.name, "Replaced previously registered spec");
        }

        {
            let mut ctx = self.context.lock();
            if resolved.tier.is_network() {
                ctx.add_api_spec(&api.name, &resolved.source);
                ctx.record_interaction(
                    "api_registered",
                    Some(&api.name),
                    None,
                    Some(&format!("Discovered {} tools", spec.tools.len())),
                );
            } else {
                ctx.add_api_spec(&api.name, "cache");
            }
        }

        tracing::info!(
            api = %api.name,
            tier = %resolved.tier,
            "Registered API '{}' with {} tools",
            api.name,
            spec.tools.len()
        );
        Ok(spec)
    }

    /// Register several APIs concurrently. One failure does not affect the others.
    pub async fn register_apis(
        &self,
        apis: &[ApiConfig],
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<Arc<ApiSpec>>)> {
        let results = join_all(apis.iter().map(|api| self.register_api(api, cancel))).await;
        apis.iter()
            .map(|api| api.name.clone())
            .zip(results)
            .inspect(|(name, result)| {
                if let Err(e) = result {
                    tracing::warn!(api = %name, error = %e, "Failed to register API");
                }
            })
            .collect()
    }

    /// Forget an API: drops it from the catalog, the spec caches and the auth map.
    pub fn unregister_api(&self, name: &str) -> bool {
        self.auth.write().remove(name);
        self.resolver.invalidate(name);
        self.catalog.remove(name).is_some()
    }

    #[must_use]
    pub fn api_names(&self) -> Vec<String> {
        self.catalog.api_names()
    }

    #[must_use]
    pub fn api(&self, name: &str) -> Option<Arc<ApiSpec>> {
        self.catalog.get(name)
    }

    /// # Errors
    ///
    /// [`AgentError::UnknownApi`] if `api` is not registered.
    pub fn list_tools(&self, api: Option<&str>) -> Result<Vec<Tool>> {
        self.catalog.list_tools(api)
    }

    /// # Errors
    ///
    /// [`AgentError::UnknownApi`] if `api` is not registered.
    pub fn search_tools(&self, query: &str, api: Option<&str>) -> Result<Vec<Tool>> {
        self.catalog.search_tools(query, api)
    }

    /// # Errors
    ///
    /// [`AgentError::UnknownApi`] if `api` is not registered.
    pub fn tools_by_tag(&self, tag: &str, api: Option<&str>) -> Result<Vec<Tool>> {
        self.catalog.tools_by_tag(tag, api)
    }

    /// Markdown documentation for a tool, with behaviour hints derived from its method.
    ///
    /// # Errors
    ///
    /// Same as [`ToolCatalog::find_tool`].
    pub fn tool_documentation(&self, name: &str, api: Option<&str>) -> Result<String> {
        let found = self.catalog.find_tool(name, api)?;
        let tool = found.tool();
        let hints = semantics_for_method(tool.method);
        let idempotent = match hints.idempotent {
            Some(true) => "yes",
            Some(false) => "no",
            None => "unknown",
        };
        let mut doc = tool_documentation(tool);
        doc.push_str(&format!(
            "\n**API:** {}\n**Read-only:** {}, **Destructive:** {}, **Idempotent:** {}\n",
            found.api.name,
            yes_no(hints.read_only),
            yes_no(hints.destructive),
            idempotent
        ));
        Ok(doc)
    }

    /// Validate `args`, build the request with the current context attached, and send it.
    ///
    /// # Errors
    ///
    /// - lookup errors from [`ToolCatalog::find_tool`];
    /// - [`AgentError::Validation`] naming the offending parameter (nothing is sent or recorded);
    /// - [`AgentError::ContextTooLarge`] if the context cannot be encoded;
    /// - [`AgentError::Http`] on transport failures, recorded as `tool_error:<name>`;
    /// - [`AgentError::Cancelled`] when `cancel` fires.
    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
        api: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ToolCallResult> {
        let found = self.catalog.find_tool(name, api)?;
        let tool = found.tool();
        let api_name = found.api.name.clone();
        let operation = format!("{} {}", tool.method, tool.path);

        let headers = context_headers(&self.context.lock())?;
        let auth = self.auth.read().get(&api_name).cloned();
        let request = build_request(tool, &found.api.base_url, &args, &headers, auth.as_ref())?;

        tracing::debug!(api = %api_name, tool = %name, "Calling {}", operation);
        let response = match self.executor.execute(request, cancel).await {
            Ok(resp) => resp,
            Err(HttpToolsError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                self.context.lock().record_interaction(
                    &format!("tool_error:{name}"),
                    Some(&api_name),
                    Some(&operation),
                    Some(&format!("Error: {e}")),
                );
                tracing::warn!(api = %api_name, tool = %name, error = %e, "Tool call failed");
                return Err(e.into());
            }
        };

        {
            let mut ctx = self.context.lock();
            ctx.record_interaction(
                &format!("tool_call:{name}"),
                Some(&api_name),
                Some(&operation),
                Some(&response.status.to_string()),
            );
            if let Some(remote) = parse_context(&response.headers) {
                tracing::debug!(tool = %name, "{}", context_summary_line(&response.headers));
                if remote.context_id() == ctx.context_id() {
                    ctx.merge_from(&remote);
                }
            }
        }

        Ok(ToolCallResult {
            api: api_name,
            tool: name.to_string(),
            status: response.status,
            body: response.body_value(),
            headers: response.headers,
        })
    }

    /// Snapshot of the current context.
    #[must_use]
    pub fn context(&self) -> Context {
        self.context.lock().clone()
    }

    /// # Errors
    ///
    /// Returns an error if the goal or summary is too long.
    pub fn update_goal(&self, goal: &str, summary: Option<&str>) -> Result<()> {
        let mut ctx = self.context.lock();
        ctx.update_goal(goal)?;
        if summary.is_some() {
            ctx.set_context_summary(summary);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the workspace name is too long.
    pub fn update_workspace(&self, workspace: &str) -> Result<()> {
        Ok(self.context.lock().update_workspace(workspace)?)
    }

    pub fn set_error_context(&self, error: &str, file: Option<&str>) {
        self.context.lock().set_error_context(error, file);
    }

    pub fn add_recent_change(&self, change: &str) {
        self.context.lock().add_recent_change(change);
    }

    fn session_store(&self) -> Result<&Arc<dyn SessionStore>> {
        self.sessions
            .as_ref()
            .ok_or_else(|| AgentError::Config("No session store configured".to_string()))
    }

    /// Persist the context under its own id. Returns that id.
    ///
    /// # Errors
    ///
    /// [`AgentError::Config`] without a session store, or the store's error.
    pub fn save_session(&self) -> Result<String> {
        let store = self.session_store()?;
        let ctx = self.context();
        store.save(ctx.context_id(), &ctx)?;
        Ok(ctx.context_id().to_string())
    }

    /// Replace the live context with a saved one. Returns `false` if no such session exists.
    ///
    /// # Errors
    ///
    /// [`AgentError::Config`] without a session store, or the store's error.
    pub fn load_session(&self, session_id: &str) -> Result<bool> {
        let store = self.session_store()?;
        match store.load(session_id)? {
            Some(ctx) => {
                *self.context.lock() = ctx;
                tracing::info!(session = %session_id, "Loaded session");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// # Errors
    ///
    /// [`AgentError::Config`] without a session store, or the store's error.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        self.session_store()?.list(limit)
    }

    /// Cached APIs matching `query` by name, title or tool description. Empty without a cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache store cannot be enumerated.
    pub fn search_cache(&self, query: &str) -> Result<Vec<CachedApiSummary>> {
        match self.resolver.cache() {
            Some(cache) => search_cache(cache.as_ref(), query),
            None => Ok(Vec::new()),
        }
    }

    /// Ask the registry for APIs matching `query`.
    ///
    /// # Errors
    ///
    /// [`AgentError::Config`] without a registry, [`AgentError::RegistryUnavailable`] when it
    /// cannot be reached, or [`AgentError::Cancelled`].
    pub async fn search_registry(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RegistrySearchHit>> {
        let Some(registry) = self.resolver.registry() else {
            return Err(AgentError::Config("No registry is configured".to_string()));
        };
        registry.search(query, cancel).await
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}
