//! `OpenAPI` -> tool generation.
//!
//! Turns an `OpenAPI` 3.x document into a deterministic list of [`Tool`]s with validated
//! parameter descriptors. No I/O happens here: fetching and caching documents belongs to the
//! caller, and so does executing the requests built from the tools.

pub mod error;
pub mod generator;
pub mod naming;
pub mod resolver;
pub mod tool;

pub use error::{OpenApiToolsError, Result};
pub use generator::{GenerateOptions, GeneratedApi, generate, generate_from_value, parse_document};
pub use tool::{
    ApiSpec, HttpMethod, ParamLocation, RAW_BODY_PARAM, Tool, ToolParameter, search_tools,
    spec_fingerprint, tool_documentation, tools_by_tag, verify_spec_hash,
};
