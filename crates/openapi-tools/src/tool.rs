//! Normalized tool model produced from `OpenAPI` operations.

use crate::error::{OpenApiToolsError, Result};
use crate::generator::GeneratedApi;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// HTTP methods an operation can use. Declaration order is the canonical tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
}

impl HttpMethod {
    /// Operation keys of a path item, in canonical order.
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
    ];

    #[must_use]
    pub fn as_lower(self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Put => "put",
            HttpMethod::Post => "post",
            HttpMethod::Delete => "delete",
            HttpMethod::Options => "options",
            HttpMethod::Head => "head",
            HttpMethod::Patch => "patch",
        }
    }

    #[must_use]
    pub fn as_upper(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// Collision suffix form (`Post`).
    #[must_use]
    pub fn as_pascal(self) -> &'static str {
        match self {
            HttpMethod::Get => "Get",
            HttpMethod::Put => "Put",
            HttpMethod::Post => "Post",
            HttpMethod::Delete => "Delete",
            HttpMethod::Options => "Options",
            HttpMethod::Head => "Head",
            HttpMethod::Patch => "Patch",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upper())
    }
}

/// Where a parameter goes in the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Body,
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Body => "body",
        })
    }
}

/// One tool argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolParameter {
    pub name: String,
    pub location: ParamLocation,
    /// Declared JSON type (`string`, `integer`, ...).
    #[serde(rename = "type")]
    pub param_type: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Schema kept verbatim (`$ref`s inlined) for validation.
    pub schema: Value,
    /// Set on the single argument carrying a whole non-object request body.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub raw_body: bool,
}

impl ToolParameter {
    #[must_use]
    pub fn is_raw_body(&self) -> bool {
        self.raw_body && self.location == ParamLocation::Body
    }
}

/// Argument name used when the request body is not an object.
pub const RAW_BODY_PARAM: &str = "body";

/// A callable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub method: HttpMethod,
    /// Path template, always starting with `/`.
    pub path: String,
    /// Ordered path > query > header > body.
    pub parameters: Vec<ToolParameter>,
    /// Schema of the first documented JSON 2xx response, or `{}`.
    pub response_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Value>,
}

impl Tool {
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ToolParameter> {
        self.parameters.iter().filter(|p| p.required)
    }

    /// Case-insensitive substring match over name and description. `query` must be lowercase.
    #[must_use]
    pub fn matches(&self, query_lower: &str) -> bool {
        self.name.to_lowercase().contains(query_lower)
            || self.description.to_lowercase().contains(query_lower)
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// A registered API and the tools generated from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    pub name: String,
    pub base_url: String,
    pub title: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tools: Vec<Tool>,
    /// `sha256:<hex>` fingerprint of `raw_spec`.
    pub spec_hash: String,
    #[serde(skip)]
    pub raw_spec: String,
}

impl ApiSpec {
    /// Assemble a registered API from generator output and the document it came from.
    #[must_use]
    pub fn from_generated(name: &str, raw_spec: String, generated: GeneratedApi) -> Self {
        Self {
            name: name.to_string(),
            base_url: generated.base_url,
            title: generated.title,
            version: generated.version,
            description: generated.description,
            tools: generated.tools,
            spec_hash: spec_fingerprint(&raw_spec),
            raw_spec,
        }
    }

    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// `sha256:<hex>` fingerprint of a raw spec document.
#[must_use]
pub fn spec_fingerprint(raw: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(raw.as_bytes())))
}

/// Compare a document against a pinned `sha256:` fingerprint.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::SpecHash`] on mismatch.
pub fn verify_spec_hash(raw: &str, expected: &str) -> Result<()> {
    let actual = spec_fingerprint(raw);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(OpenApiToolsError::SpecHash {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Tools whose name or description contains `query` (case-insensitive).
#[must_use]
pub fn search_tools<'a>(tools: &'a [Tool], query: &str) -> Vec<&'a Tool> {
    let q = query.to_lowercase();
    tools.iter().filter(|t| t.matches(&q)).collect()
}

/// Tools carrying `tag` (case-insensitive).
#[must_use]
pub fn tools_by_tag<'a>(tools: &'a [Tool], tag: &str) -> Vec<&'a Tool> {
    tools.iter().filter(|t| t.has_tag(tag)).collect()
}

/// Markdown documentation for one tool.
#[must_use]
pub fn tool_documentation(tool: &Tool) -> String {
    let mut doc = format!("## {}\n\n", tool.name);
    doc.push_str(&format!("**Method:** {}\n", tool.method));
    doc.push_str(&format!("**Path:** {}\n", tool.path));
    if !tool.tags.is_empty() {
        doc.push_str(&format!("**Tags:** {}\n", tool.tags.join(", ")));
    }
    if tool.deprecated {
        doc.push_str("**Deprecated**\n");
    }
    doc.push('\n');
    doc.push_str(&tool.description);
    doc.push_str("\n\n");

    if tool.parameters.is_empty() {
        doc.push_str("No parameters.\n");
        return doc;
    }

    doc.push_str("### Parameters\n\n");
    for param in &tool.parameters {
        let required = if param.required { "required" } else { "optional" };
        doc.push_str(&format!(
            "- `{}` ({}, {}, {})",
            param.name, param.param_type, param.location, required
        ));
        if let Some(desc) = &param.description {
            doc.push_str(&format!(": {desc}"));
        }
        if let Some(default) = &param.default {
            doc.push_str(&format!(" [default: {default}]"));
        }
        doc.push('\n');
    }
    doc
}
