use crate::error::{AgentError, Result};
use ocp_http_tools::AuthConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.ocp.dev";
pub const DEFAULT_MAX_AGE_DAYS: u32 = 7;

/// Agent-wide settings, usually loaded from a YAML or JSON file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub agent_type: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub workspace: Option<String>,

    #[serde(default)]
    pub goal: Option<String>,

    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Storage root; `~/.ocp` when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_cache: bool,

    #[serde(default = "default_max_age_days")]
    pub cache_max_age_days: u32,

    /// Registry lookups and spec downloads.
    #[serde(default = "default_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Tool calls.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Response body cap for tool calls and spec downloads. Unlimited when unset.
    #[serde(default)]
    pub max_response_bytes: Option<usize>,

    #[serde(default)]
    pub apis: Vec<ApiConfig>,
}

/// One API to register.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub name: String,

    /// `OpenAPI` document URL or file path. Registry lookup is used when unset.
    #[serde(default)]
    pub spec_url: Option<String>,

    /// Override the base URL from the document.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Cache TTL for this API; `0` forces a refetch.
    #[serde(default)]
    pub max_age_days: Option<u32>,

    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Pinned `sha256:<hex>` fingerprint of the document.
    #[serde(default)]
    pub spec_hash: Option<String>,

    #[serde(default)]
    pub spec_hash_policy: HashPolicy,
}

impl ApiConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_spec_url(mut self, url: impl Into<String>) -> Self {
        self.spec_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = Some(days);
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }
}

/// What to do when a document does not match its pinned hash.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log a warning and continue.
    #[default]
    Warn,
    /// Abort the registration.
    Fail,
    Ignore,
}

fn default_registry_url() -> String {
    DEFAULT_REGISTRY_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_age_days() -> u32 {
    DEFAULT_MAX_AGE_DAYS
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_history_limit() -> usize {
    ocp_context::DEFAULT_HISTORY_LIMIT
}

impl AgentConfig {
    /// Defaults for everything except the agent type.
    #[must_use]
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            user: None,
            workspace: None,
            goal: None,
            registry_url: default_registry_url(),
            cache_dir: None,
            enable_cache: true,
            cache_max_age_days: DEFAULT_MAX_AGE_DAYS,
            fetch_timeout_secs: default_timeout_secs(),
            request_timeout_secs: default_timeout_secs(),
            history_limit: default_history_limit(),
            max_response_bytes: None,
            apis: Vec::new(),
        }
    }

    /// Load a YAML or JSON file, then apply `OCP_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&text).map_err(|e| match e {
            AgentError::Config(msg) => AgentError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML (or JSON, which is a subset) without touching the environment.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if the text does not describe an `AgentConfig`.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| AgentError::Config(e.to_string()))
    }

    /// `OCP_REGISTRY_URL` and `OCP_CACHE_DIR` override the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OCP_REGISTRY_URL").filter(|v| !v.trim().is_empty()) {
            self.registry_url = url;
        }
        if let Some(dir) = lookup("OCP_CACHE_DIR").filter(|v| !v.trim().is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    /// # Errors
    ///
    /// Returns [`AgentError::Config`] on an empty agent type, a non-http registry URL, or
    /// missing/duplicate API names.
    pub fn validate(&self) -> Result<()> {
        if self.agent_type.trim().is_empty() {
            return Err(AgentError::Config("agentType must not be empty".to_string()));
        }
        if !self.registry_url.starts_with("http://") && !self.registry_url.starts_with("https://")
        {
            return Err(AgentError::Config(format!(
                "Invalid registry URL: {}",
                self.registry_url
            )));
        }
        let mut seen = HashSet::new();
        for api in &self.apis {
            if api.name.trim().is_empty() {
                return Err(AgentError::Config("API name must not be empty".to_string()));
            }
            if !seen.insert(api.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "Duplicate API name '{}'",
                    api.name
                )));
            }
        }
        Ok(())
    }

    /// Storage root: `cacheDir`, else `~/.ocp`, else `./.ocp` when no home directory exists.
    #[must_use]
    pub fn storage_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".ocp")
        })
    }

    /// Effective TTL for one API.
    #[must_use]
    pub fn max_age_days_for(&self, api: &ApiConfig) -> u32 {
        api.max_age_days.unwrap_or(self.cache_max_age_days)
    }
}
