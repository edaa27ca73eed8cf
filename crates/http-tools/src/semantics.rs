//! RFC 9110 method semantics for generated tools.

use ocp_openapi_tools::HttpMethod;
use serde::Serialize;

/// Behavioural hints for a tool, derived from its HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSemantics {
    pub read_only: bool,
    pub destructive: bool,
    /// `None` when the method does not settle it (PATCH).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
}

#[must_use]
pub fn semantics_for_method(method: HttpMethod) -> MethodSemantics {
    match method {
        HttpMethod::Get | HttpMethod::Head | HttpMethod::Options => MethodSemantics {
            read_only: true,
            destructive: false,
            idempotent: Some(true),
        },
        HttpMethod::Post => MethodSemantics {
            read_only: false,
            destructive: false,
            idempotent: Some(false),
        },
        HttpMethod::Put | HttpMethod::Delete => MethodSemantics {
            read_only: false,
            destructive: true,
            idempotent: Some(true),
        },
        HttpMethod::Patch => MethodSemantics {
            read_only: false,
            destructive: true,
            idempotent: None,
        },
    }
}
