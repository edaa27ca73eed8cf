//! Registered APIs and tool lookup across them.

use crate::error::{AgentError, Result};
use ocp_openapi_tools::{ApiSpec, Tool, search_tools, tools_by_tag};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A tool located in the catalog, pinned to the API snapshot it came from.
#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub api: Arc<ApiSpec>,
    index: usize,
}

impl ResolvedTool {
    #[must_use]
    pub fn tool(&self) -> &Tool {
        &self.api.tools[self.index]
    }
}

/// `apiName -> ApiSpec`. Re-registering an API swaps the whole snapshot, so readers holding an
/// older `Arc` keep a consistent view.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    apis: RwLock<BTreeMap<String, Arc<ApiSpec>>>,
}

impl ToolCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the snapshot that was replaced, if any.
    pub fn insert(&self, spec: Arc<ApiSpec>) -> Option<Arc<ApiSpec>> {
        self.apis.write().insert(spec.name.clone(), spec)
    }

    pub fn remove(&self, api: &str) -> Option<Arc<ApiSpec>> {
        self.apis.write().remove(api)
    }

    #[must_use]
    pub fn get(&self, api: &str) -> Option<Arc<ApiSpec>> {
        self.apis.read().get(api).cloned()
    }

    #[must_use]
    pub fn api_names(&self) -> Vec<String> {
        self.apis.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apis.read().is_empty()
    }

    fn scope(&self, api: Option<&str>) -> Result<Vec<Arc<ApiSpec>>> {
        let apis = self.apis.read();
        match api {
            Some(name) => apis
                .get(name)
                .cloned()
                .map(|spec| vec![spec])
                .ok_or_else(|| AgentError::UnknownApi(name.to_string())),
            None => Ok(apis.values().cloned().collect()),
        }
    }

    /// Every tool, or only those of `api`. Ordered by API name, then generation order.
    ///
    /// # Errors
    ///
    /// [`AgentError::UnknownApi`] if `api` is not registered.
    pub fn list_tools(&self, api: Option<&str>) -> Result<Vec<Tool>> {
        Ok(self
            .scope(api)?
            .iter()
            .flat_map(|spec| spec.tools.iter().cloned())
            .collect())
    }

    /// Tools whose name or description contains `query`, case-insensitively.
    ///
    /// # Errors
    ///
    /// [`AgentError::UnknownApi`] if `api` is not registered.
    pub fn search_tools(&self, query: &str, api: Option<&str>) -> Result<Vec<Tool>> {
        Ok(self
            .scope(api)?
            .iter()
            .flat_map(|spec| search_tools(&spec.tools, query).into_iter().cloned())
            .collect())
    }

    /// # Errors
    ///
    /// [`AgentError::UnknownApi`] if `api` is not registered.
    pub fn tools_by_tag(&self, tag: &str, api: Option<&str>) -> Result<Vec<Tool>> {
        Ok(self
            .scope(api)?
            .iter()
            .flat_map(|spec| tools_by_tag(&spec.tools, tag).into_iter().cloned())
            .collect())
    }

    /// Locate `name`, optionally restricted to `api`.
    ///
    /// # Errors
    ///
    /// - [`AgentError::UnknownApi`] if `api` is not registered.
    /// - [`AgentError::AmbiguousTool`] if several APIs define `name` and `api` is `None`.
    /// - [`AgentError::ToolNotFound`] otherwise, listing every tool name in scope.
    pub fn find_tool(&self, name: &str, api: Option<&str>) -> Result<ResolvedTool> {
        let scope = self.scope(api)?;
        let mut hits: Vec<ResolvedTool> = scope
            .iter()
            .filter_map(|spec| {
                spec.tools
                    .iter()
                    .position(|t| t.name == name)
                    .map(|index| ResolvedTool {
                        api: spec.clone(),
                        index,
                    })
            })
            .collect();

        match hits.len() {
            1 => Ok(hits.remove(0)),
            0 => {
                let mut available: Vec<String> = scope
                    .iter()
                    .flat_map(|spec| spec.tools.iter().map(|t| t.name.clone()))
                    .collect();
                available.sort();
                available.dedup();
                Err(AgentError::ToolNotFound {
                    name: name.to_string(),
                    available,
                })
            }
            _ => Err(AgentError::AmbiguousTool {
                name: name.to_string(),
                apis: hits.iter().map(|h| h.api.name.clone()).collect(),
            }),
        }
    }
}
