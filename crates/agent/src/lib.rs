//! OCP agent runtime: discover `OpenAPI` tools, cache their specs, and call them with the agent
//! context attached.
//!
//! An [`OcpAgent`] owns one [`ocp_context::Context`], a [`ToolCatalog`] of registered APIs, and a
//! [`SpecResolver`] that looks specs up in memory, then the local cache, then the registry, and
//! finally downloads them.

pub mod agent;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod registry;
pub mod sessions;

pub use agent::{OcpAgent, ToolCallResult};
pub use cache::{
    CacheEntry, CacheStore, CachedApiSummary, FsCacheStore, MemoryCacheStore, search_cache,
};
pub use catalog::{ResolvedTool, ToolCatalog};
pub use config::{AgentConfig, ApiConfig, DEFAULT_MAX_AGE_DAYS, DEFAULT_REGISTRY_URL, HashPolicy};
pub use error::{AgentError, Result};
pub use fetcher::{
    DEFAULT_FETCH_TIMEOUT, HttpSpecFetcher, ResolveOptions, ResolvedSpec, SpecFetcher,
    SpecResolver, SpecTier,
};
pub use registry::{
    HttpRegistry, MAX_SUGGESTIONS, RegistryClient, RegistryEntry, RegistrySearchHit,
    SEARCH_PAGE_SIZE, suggest_names,
};
pub use sessions::{FsSessionStore, SessionStore, SessionSummary};
