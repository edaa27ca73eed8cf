//! Error types for `ocp-http-tools`.

use crate::safety::sanitize_reqwest_error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpToolsError {
    /// Caller arguments do not satisfy the tool's parameter table.
    #[error("Validation error for '{parameter}': {message}")]
    Validation { parameter: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    /// Request blocked by policy or rejected before sending.
    #[error("http error: {0}")]
    Http(String),

    #[error("http transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("Response too large: exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },
}

impl HttpToolsError {
    pub(crate) fn validation(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HttpToolsError>;

impl From<reqwest::Error> for HttpToolsError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(sanitize_reqwest_error(&value))
    }
}
