//! `OpenAPI` document -> tool list.
//!
//! Generation is a pure function of the document text and [`GenerateOptions`]: operations are
//! visited in sorted (path, method) order, so names and collision suffixes do not depend on map
//! iteration order.

use crate::error::{OpenApiToolsError, Result};
use crate::naming::{reserve_unique_tool_name, tool_name};
use crate::resolver::OpenApiResolver;
use crate::tool::{HttpMethod, ParamLocation, RAW_BODY_PARAM, Tool, ToolParameter};
use openapiv3::{Info, Server};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use url::Url;

static PATH_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}/]+)\}").expect("valid path placeholder regex"));

// Header parameters with these names are ignored by OpenAPI itself.
const RESERVED_HEADERS: [&str; 3] = ["accept", "content-type", "authorization"];

/// Inputs that do not come from the document itself.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Explicit base URL; wins over `servers[0].url`.
    pub base_url: Option<String>,
    /// Where the document was fetched from; relative server URLs are resolved against it.
    pub spec_url: Option<String>,
}

/// Result of [`generate`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedApi {
    pub title: String,
    pub version: String,
    pub description: Option<String>,
    pub base_url: String,
    pub tools: Vec<Tool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperation {
    #[serde(default)]
    operation_id: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    deprecated: bool,
    #[serde(default)]
    security: Option<Value>,
    #[serde(default)]
    parameters: Vec<Value>,
    #[serde(default)]
    request_body: Option<Value>,
    #[serde(default)]
    responses: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawParameter {
    name: String,
    #[serde(rename = "in")]
    location: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    schema: Option<Value>,
    #[serde(default)]
    content: Option<Map<String, Value>>,
    #[serde(default)]
    description: Option<String>,
}

/// Parse a JSON or YAML `OpenAPI` document.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::Parse`] if the text is neither.
pub fn parse_document(text: &str) -> Result<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| OpenApiToolsError::Parse {
            message: e.to_string(),
        })?;
    Ok(yaml_to_json(yaml))
}

// YAML allows non-string keys (`200:` under `responses`); JSON object keys are stringified.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Y;
    match value {
        Y::Null => Value::Null,
        Y::Bool(b) => Value::Bool(b),
        Y::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!(i)
            } else if let Some(u) = n.as_u64() {
                json!(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Value::Null, Value::Number)
            }
        }
        Y::String(s) => Value::String(s),
        Y::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Y::Mapping(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                let key = match k {
                    Y::String(s) => s,
                    Y::Number(n) => n.to_string(),
                    Y::Bool(b) => b.to_string(),
                    other => match yaml_to_json(other) {
                        Value::String(s) => s,
                        v => v.to_string(),
                    },
                };
                out.insert(key, yaml_to_json(v));
            }
            Value::Object(out)
        }
        Y::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

/// Generate tools from raw document text.
///
/// # Errors
///
/// Returns an error if the document cannot be parsed, its top-level shape is invalid, or no
/// base URL can be determined. Individual bad operations are logged and skipped.
pub fn generate(raw_spec: &str, options: &GenerateOptions) -> Result<GeneratedApi> {
    let doc = parse_document(raw_spec)?;
    generate_from_value(&doc, options)
}

/// Generate tools from an already parsed document.
///
/// # Errors
///
/// See [`generate`].
pub fn generate_from_value(doc: &Value, options: &GenerateOptions) -> Result<GeneratedApi> {
    let (info, paths) = validate_top_level(doc)?;
    let base_url = resolve_base_url(doc, options)?;
    let resolver = OpenApiResolver::new(doc);

    let mut path_items: Vec<(&str, Value)> = Vec::with_capacity(paths.len());
    for (path, item) in paths {
        if !path.starts_with('/') {
            tracing::warn!("Skipping path '{}': must start with '/'", path);
            continue;
        }
        match resolver.resolve_value(item) {
            Ok(v) => path_items.push((path.as_str(), v)),
            Err(e) => tracing::warn!("Skipping path '{}': {}", path, e),
        }
    }
    path_items.sort_by(|a, b| a.0.cmp(b.0));

    let mut tools = Vec::new();
    let mut tool_names: HashSet<String> = HashSet::new();

    for (path, path_item) in &path_items {
        for method in HttpMethod::ALL {
            let Some(operation) = path_item.get(method.as_lower()) else {
                continue;
            };
            match build_tool(&resolver, path, method, path_item, operation) {
                Ok(mut tool) => {
                    let base = tool_name(tool.operation_id.as_deref(), method, path);
                    tool.name = reserve_unique_tool_name(&mut tool_names, &base, method);
                    if tool.name != base {
                        tracing::debug!(tool = %tool.name, base = %base, "Disambiguated tool name");
                    }
                    tools.push(tool);
                }
                Err(e) => {
                    tracing::warn!("Skipping {} {} in '{}': {}", method, path, info.title, e);
                }
            }
        }
    }

    tracing::info!(
        "Generated {} tools from OpenAPI spec '{}'",
        tools.len(),
        info.title
    );

    Ok(GeneratedApi {
        title: info.title,
        version: info.version,
        description: info.description,
        base_url,
        tools,
    })
}

fn validate_top_level(doc: &Value) -> Result<(Info, &Map<String, Value>)> {
    let Some(root) = doc.as_object() else {
        return Err(OpenApiToolsError::Schema(
            "OpenAPI document must be an object".to_string(),
        ));
    };

    let version = match root.get("openapi") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => {
            return Err(OpenApiToolsError::Schema(
                "'openapi' must be a version string".to_string(),
            ));
        }
        None if root.contains_key("swagger") => {
            return Err(OpenApiToolsError::Schema(
                "Swagger 2.0 documents are not supported; OpenAPI 3.x required".to_string(),
            ));
        }
        None => {
            return Err(OpenApiToolsError::Schema(
                "Missing 'openapi' version field".to_string(),
            ));
        }
    };
    if !version.starts_with("3.") {
        return Err(OpenApiToolsError::Schema(format!(
            "Unsupported OpenAPI version '{version}'; 3.x required",
        )));
    }

    let info_value = root
        .get("info")
        .ok_or_else(|| OpenApiToolsError::Schema("Missing 'info' object".to_string()))?;
    let info: Info = serde_json::from_value(info_value.clone())
        .map_err(|e| OpenApiToolsError::Schema(format!("Invalid 'info' object: {e}")))?;

    let paths = root
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| OpenApiToolsError::Schema("Missing 'paths' object".to_string()))?;

    Ok((info, paths))
}

fn resolve_base_url(doc: &Value, options: &GenerateOptions) -> Result<String> {
    let base_url = options
        .base_url
        .clone()
        .or_else(|| first_server_url(doc));

    let Some(base_url) = base_url else {
        return Err(OpenApiToolsError::Schema(
            "No base URL configured and none found in spec".to_string(),
        ));
    };

    if base_url.starts_with("http://") || base_url.starts_with("https://") {
        return Ok(base_url.trim_end_matches('/').to_string());
    }

    // Relative server URLs (e.g. "/api/v3") resolve against the spec URL when it is known.
    if let Some(spec_url) = options
        .spec_url
        .as_deref()
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
    {
        let mut spec_url = Url::parse(spec_url).map_err(|e| {
            OpenApiToolsError::Schema(format!("Invalid OpenAPI spec URL '{spec_url}': {e}"))
        })?;
        spec_url.set_fragment(None);
        let resolved = spec_url.join(&base_url).map_err(|e| {
            OpenApiToolsError::Schema(format!(
                "Invalid baseUrl '{base_url}': {e} (set baseUrl explicitly)",
            ))
        })?;
        return Ok(resolved.as_str().trim_end_matches('/').to_string());
    }

    Err(OpenApiToolsError::Schema(format!(
        "Invalid baseUrl '{base_url}': must be an absolute http(s) URL (set baseUrl explicitly)",
    )))
}

fn first_server_url(doc: &Value) -> Option<String> {
    let servers: Vec<Server> = serde_json::from_value(doc.get("servers")?.clone()).ok()?;
    let server = servers.into_iter().next()?;
    let mut url = server.url;
    if let Some(vars) = &server.variables {
        for (name, var) in vars {
            url = url.replace(&format!("{{{name}}}"), &var.default);
        }
    }
    Some(url)
}

fn build_tool(
    resolver: &OpenApiResolver<'_>,
    path: &str,
    method: HttpMethod,
    path_item: &Value,
    operation: &Value,
) -> Result<Tool> {
    let op: RawOperation = serde_json::from_value(operation.clone())
        .map_err(|e| OpenApiToolsError::OpenApi(format!("Malformed operation: {e}")))?;

    let path_item_params: Vec<Value> = match path_item.get("parameters") {
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            OpenApiToolsError::OpenApi(format!("Malformed path-level parameters: {e}"))
        })?,
        None => Vec::new(),
    };

    let parameters = collect_tool_parameters(resolver, path, &path_item_params, &op)?;
    let response_schema = derive_response_schema(resolver, &op.responses);

    let description = op
        .summary
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| op.description.clone().filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| format!("{method} {path}"));

    Ok(Tool {
        name: String::new(),
        description,
        method,
        path: path.to_string(),
        parameters,
        response_schema,
        operation_id: op.operation_id,
        tags: op.tags,
        deprecated: op.deprecated,
        security: op.security,
    })
}

fn collect_tool_parameters(
    resolver: &OpenApiResolver<'_>,
    path: &str,
    path_item_params: &[Value],
    op: &RawOperation,
) -> Result<Vec<ToolParameter>> {
    let merged = merge_parameters(resolver, path_item_params, &op.parameters)?;

    let mut parameters: Vec<ToolParameter> = Vec::new();
    let mut names: HashSet<String> = HashSet::new();

    // Path parameters follow placeholder order in the template.
    let placeholders: Vec<&str> = PATH_PLACEHOLDER
        .captures_iter(path)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    for placeholder in &placeholders {
        let declared = merged
            .iter()
            .find(|p| p.location == "path" && p.name == *placeholder);
        let param = match declared {
            Some(p) => extract_parameter(resolver, p, ParamLocation::Path, true),
            None => ToolParameter {
                name: (*placeholder).to_string(),
                location: ParamLocation::Path,
                param_type: "string".to_string(),
                required: true,
                default: None,
                description: None,
                schema: json!({"type": "string"}),
                raw_body: false,
            },
        };
        push_unique(&mut parameters, &mut names, param);
    }

    for p in &merged {
        match p.location.as_str() {
            "path" => {
                if !placeholders.contains(&p.name.as_str()) {
                    tracing::debug!(param = %p.name, path, "Ignoring path parameter missing from template");
                }
            }
            "query" | "header" | "cookie" => {}
            other => {
                return Err(OpenApiToolsError::OpenApi(format!(
                    "Unsupported parameter location '{other}' for '{}'",
                    p.name
                )));
            }
        }
    }

    for p in merged.iter().filter(|p| p.location == "query") {
        let param = extract_parameter(resolver, p, ParamLocation::Query, p.required);
        push_unique(&mut parameters, &mut names, param);
    }

    for p in merged.iter().filter(|p| p.location == "header") {
        if RESERVED_HEADERS.contains(&p.name.to_ascii_lowercase().as_str()) {
            tracing::debug!(param = %p.name, "Ignoring reserved header parameter");
            continue;
        }
        let param = extract_parameter(resolver, p, ParamLocation::Header, p.required);
        push_unique(&mut parameters, &mut names, param);
    }

    for p in merged.iter().filter(|p| p.location == "cookie") {
        tracing::debug!(param = %p.name, "Ignoring cookie parameter");
    }

    if let Some(body_ref) = &op.request_body {
        let body = resolver.resolve_value(body_ref)?;
        let body_required = body
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if let Some(schema) = json_media_schema(body.get("content")) {
            let schema = resolver.inline_schema(schema);
            for param in extract_body_params(&schema, body_required) {
                push_unique(&mut parameters, &mut names, param);
            }
        }
    }

    Ok(parameters)
}

fn push_unique(params: &mut Vec<ToolParameter>, names: &mut HashSet<String>, param: ToolParameter) {
    if names.insert(param.name.clone()) {
        params.push(param);
    } else {
        tracing::debug!(
            param = %param.name,
            location = %param.location,
            "Skipping parameter whose name is already taken"
        );
    }
}

/// Path-item parameters overridden by operation parameters with the same (in, name).
fn merge_parameters(
    resolver: &OpenApiResolver<'_>,
    path_item_params: &[Value],
    operation_params: &[Value],
) -> Result<Vec<RawParameter>> {
    let mut merged: Vec<RawParameter> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for p in path_item_params {
        let (_, rp) = resolver.resolve::<RawParameter>(p)?;
        index.insert((rp.location.clone(), rp.name.clone()), merged.len());
        merged.push(rp);
    }

    for p in operation_params {
        let (_, rp) = resolver.resolve::<RawParameter>(p)?;
        let key = (rp.location.clone(), rp.name.clone());
        if let Some(i) = index.get(&key).copied() {
            merged[i] = rp;
        } else {
            index.insert(key, merged.len());
            merged.push(rp);
        }
    }

    Ok(merged)
}

fn extract_parameter(
    resolver: &OpenApiResolver<'_>,
    param: &RawParameter,
    location: ParamLocation,
    required: bool,
) -> ToolParameter {
    let raw_schema = param
        .schema
        .as_ref()
        .or_else(|| {
            param
                .content
                .as_ref()
                .and_then(|c| c.values().next())
                .and_then(|mt| mt.get("schema"))
        })
        .cloned()
        .unwrap_or_else(|| json!({"type": "string"}));

    let mut schema = resolver.inline_schema(&raw_schema);
    if let Some(obj) = schema.as_object_mut()
        && !obj.contains_key("description")
        && let Some(desc) = &param.description
    {
        obj.insert("description".to_string(), Value::String(desc.clone()));
    }

    ToolParameter {
        name: param.name.clone(),
        location,
        param_type: schema_type(&schema, "string"),
        required,
        default: schema.get("default").cloned(),
        description: param.description.clone(),
        schema,
        raw_body: false,
    }
}

/// Flatten an object body into one parameter per property; anything else becomes `body`.
fn extract_body_params(schema: &Value, body_required: bool) -> Vec<ToolParameter> {
    let properties = schema.get("properties").and_then(Value::as_object);
    let is_object = matches!(schema.get("type").and_then(Value::as_str), None | Some("object"));

    if let (Some(properties), true) = (properties, is_object) {
        let required: HashSet<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        // Sorted so parameter order does not depend on map ordering features.
        let mut props: Vec<(&String, &Value)> = properties.iter().collect();
        props.sort_by(|a, b| a.0.cmp(b.0));

        return props
            .into_iter()
            .map(|(name, prop_schema)| ToolParameter {
                name: name.clone(),
                location: ParamLocation::Body,
                param_type: schema_type(prop_schema, "object"),
                required: required.contains(name.as_str()),
                default: prop_schema.get("default").cloned(),
                description: prop_schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                schema: prop_schema.clone(),
                raw_body: false,
            })
            .collect();
    }

    vec![ToolParameter {
        name: RAW_BODY_PARAM.to_string(),
        location: ParamLocation::Body,
        param_type: schema_type(schema, "object"),
        required: body_required,
        default: None,
        description: schema
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        schema: schema.clone(),
        raw_body: true,
    }]
}

/// First explicit 2xx by code, then the `2XX` range, that documents a JSON schema.
fn derive_response_schema(resolver: &OpenApiResolver<'_>, responses: &Map<String, Value>) -> Value {
    let mut explicit_2xx: Vec<(u16, &Value)> = Vec::new();
    let mut range_2xx: Option<&Value> = None;

    for (code, resp) in responses {
        match code.parse::<u16>() {
            Ok(n) if (200..300).contains(&n) => explicit_2xx.push((n, resp)),
            _ if code.eq_ignore_ascii_case("2XX") => range_2xx = Some(resp),
            _ => {}
        }
    }
    explicit_2xx.sort_by_key(|(n, _)| *n);

    for resp_ref in explicit_2xx.iter().map(|(_, r)| *r).chain(range_2xx) {
        let resp = match resolver.resolve_value(resp_ref) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unresolvable response");
                continue;
            }
        };
        if let Some(schema) = json_media_schema(resp.get("content")) {
            return resolver.inline_schema(schema);
        }
    }

    json!({})
}

/// Schema of `application/json`, or else of the first JSON-ish media type.
fn json_media_schema(content: Option<&Value>) -> Option<&Value> {
    let content = content?.as_object()?;
    if let Some(schema) = content.get("application/json").and_then(|mt| mt.get("schema")) {
        return Some(schema);
    }
    content.iter().find_map(|(k, mt)| {
        let lower = k.to_ascii_lowercase();
        if lower.contains("json") {
            mt.get("schema")
        } else {
            None
        }
    })
}

fn schema_type(schema: &Value, fallback: &str) -> String {
    match schema.get("type") {
        Some(Value::String(t)) => t.clone(),
        // 3.1 style `type: [string, "null"]`.
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or(fallback)
            .to_string(),
        _ if schema.get("properties").is_some() => "object".to_string(),
        _ if schema.get("items").is_some() => "array".to_string(),
        _ => fallback.to_string(),
    }
}
