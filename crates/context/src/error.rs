//! Error types for `ocp-context`.

use thiserror::Error;

/// Errors raised while building, mutating or encoding a [`crate::Context`].
#[derive(Error, Debug)]
pub enum ContextError {
    /// A required field was empty.
    #[error("Context field '{field}' must not be empty")]
    EmptyField { field: &'static str },

    /// A bounded field exceeded its maximum length.
    #[error("Context field '{field}' is {len} chars long (limit {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// The context id does not match `[A-Za-z0-9-]{1,64}`.
    #[error("Invalid context id '{0}': expected 1-64 chars of [A-Za-z0-9-]")]
    InvalidContextId(String),

    /// The encoded `OCP-Session` value cannot fit the header budget.
    #[error("Context too large: encoded session is {size} bytes (limit {limit}) after pruning history")]
    ContextTooLarge { size: usize, limit: usize },

    /// A context document could not be deserialized.
    #[error("Invalid context document: {0}")]
    InvalidDocument(String),

    /// JSON serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;
