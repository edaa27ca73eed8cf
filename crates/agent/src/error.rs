//! Error types for `ocp-agent`.

use ocp_context::ContextError;
use ocp_http_tools::HttpToolsError;
use ocp_openapi_tools::OpenApiToolsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// The API's document is malformed or unsupported. Fatal to that registration only.
    #[error("Schema error in API '{api}': {source}")]
    Schema {
        api: String,
        #[source]
        source: OpenApiToolsError,
    },

    /// Caller arguments do not fit the tool.
    #[error("Validation error for parameter '{parameter}': {message}")]
    Validation { parameter: String, message: String },

    #[error("Tool '{name}' not found. Available tools: {}", .available.join(", "))]
    ToolNotFound { name: String, available: Vec<String> },

    #[error("Tool '{name}' is provided by several APIs ({}); pass an API name", .apis.join(", "))]
    AmbiguousTool { name: String, apis: Vec<String> },

    #[error("Unknown API: {0}")]
    UnknownApi(String),

    #[error("Context too large: {size} bytes encoded (limit {limit})")]
    ContextTooLarge { size: usize, limit: usize },

    #[error("Registry unavailable at {url}: {message}")]
    RegistryUnavailable { url: String, message: String },

    #[error("API '{name}' not found in registry{}", suggestion_suffix(.suggestions))]
    ApiNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("Failed to fetch spec from {url}: {message}")]
    SpecFetch { url: String, message: String },

    #[error("Spec hash mismatch for '{api}'. Expected: {expected}, Got: {actual}")]
    SpecHash {
        api: String,
        expected: String,
        actual: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Context error: {0}")]
    Context(ContextError),

    #[error(transparent)]
    Http(HttpToolsError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn suggestion_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

impl From<ContextError> for AgentError {
    fn from(value: ContextError) -> Self {
        match value {
            ContextError::ContextTooLarge { size, limit } => Self::ContextTooLarge { size, limit },
            other => Self::Context(other),
        }
    }
}

impl From<HttpToolsError> for AgentError {
    fn from(value: HttpToolsError) -> Self {
        match value {
            HttpToolsError::Validation { parameter, message } => {
                Self::Validation { parameter, message }
            }
            HttpToolsError::Cancelled => Self::Cancelled,
            other => Self::Http(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
