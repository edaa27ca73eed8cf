//! Error types for `ocp-openapi-tools`.

use thiserror::Error;

/// Main error type for `OpenAPI` tool generation.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// The document's top-level shape is malformed or unsupported (fatal to one registration).
    #[error("Schema error: {0}")]
    Schema(String),

    /// A single operation could not be turned into a tool.
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    /// The document is neither valid JSON nor valid YAML.
    #[error("OpenAPI error: failed to parse document: {message}")]
    Parse { message: String },

    /// A `$ref` pointed nowhere, or outside the document.
    #[error("Unresolved $ref '{0}'")]
    UnresolvedRef(String),

    /// A `$ref` chain looped back on itself.
    #[error("Cyclic $ref detected while resolving: {0}")]
    CyclicRef(String),

    /// Spec fingerprint did not match the pinned hash.
    #[error("Spec hash mismatch. Expected: {expected}, Got: {actual}")]
    SpecHash { expected: String, actual: String },

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
