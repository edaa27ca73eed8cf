//! Parameter validation and request building.
//!
//! [`build_request`] turns a tool, a base URL and caller arguments into an [`HttpRequest`]. It does
//! no I/O; the executor sends the result.

use crate::config::AuthConfig;
use crate::error::{HttpToolsError, Result};
use ocp_openapi_tools::{HttpMethod, ParamLocation, Tool, ToolParameter};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use url::Url;

/// A fully built outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl HttpRequest {
    /// A bare `GET` with no headers or body.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

// RFC 3986 unreserved characters stay literal.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

struct QueryPair {
    key: String,
    value: String,
}

/// Validate `args` against `tool` and build the request.
///
/// Headers are layered: header parameters, then `context_headers`, then auth. Later layers
/// replace earlier values with the same name.
///
/// # Errors
///
/// Returns [`HttpToolsError::Validation`] when a required argument is missing, a value violates
/// its schema, or a path placeholder is left unfilled. Returns [`HttpToolsError::Config`] for an
/// invalid base URL or auth config.
pub fn build_request(
    tool: &Tool,
    base_url: &str,
    args: &Value,
    context_headers: &HeaderMap,
    auth: Option<&AuthConfig>,
) -> Result<HttpRequest> {
    let empty = Map::new();
    let args = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(HttpToolsError::validation(
                "arguments",
                format!("expected an object, got {}", json_type_name(other)),
            ));
        }
    };

    log_unknown_arguments(tool, args);

    // Every missing required argument is reported before any schema check runs.
    for param in &tool.parameters {
        if param.required && provided(args, param).is_none() {
            return Err(HttpToolsError::validation(
                &param.name,
                "missing required parameter",
            ));
        }
    }
    for param in &tool.parameters {
        if let Some(value) = provided(args, param) {
            validate_value(param, value)?;
        }
    }

    let mut path = tool.path.clone();
    let mut query: Vec<QueryPair> = Vec::new();
    let mut headers = HeaderMap::new();
    let mut body_fields = Map::new();
    let mut raw_body: Option<Value> = None;

    for param in &tool.parameters {
        let Some(value) = provided(args, param).or(param.default.as_ref()) else {
            continue;
        };
        match param.location {
            ParamLocation::Path => {
                let encoded = encode_component(&simple_style(value));
                path = path.replace(&format!("{{{}}}", param.name), &encoded);
            }
            ParamLocation::Query => push_query(&mut query, &param.name, value),
            ParamLocation::Header => {
                let name = HeaderName::from_bytes(param.name.as_bytes()).map_err(|e| {
                    HttpToolsError::validation(&param.name, format!("invalid header name: {e}"))
                })?;
                let value = HeaderValue::from_str(&simple_style(value)).map_err(|e| {
                    HttpToolsError::validation(&param.name, format!("invalid header value: {e}"))
                })?;
                headers.insert(name, value);
            }
            ParamLocation::Body if param.is_raw_body() => raw_body = Some(value.clone()),
            ParamLocation::Body => {
                body_fields.insert(param.name.clone(), value.clone());
            }
        }
    }

    if let Some(placeholder) = unfilled_placeholder(&path) {
        return Err(HttpToolsError::validation(
            placeholder,
            "path placeholder has no value",
        ));
    }

    for (name, value) in context_headers {
        headers.insert(name.clone(), value.clone());
    }
    if let Some(auth) = auth {
        headers.extend(auth.headers()?);
        if let Some((name, value)) = auth.query_pair() {
            query.retain(|p| p.key != name);
            query.push(QueryPair {
                key: name.to_string(),
                value: value.to_string(),
            });
        }
    }

    let body = raw_body.or_else(|| (!body_fields.is_empty()).then_some(Value::Object(body_fields)));
    if body.is_some() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    Ok(HttpRequest {
        method: to_reqwest_method(tool.method),
        url: build_url(base_url, &path, &query)?,
        headers,
        body,
    })
}

#[must_use]
pub fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Post => Method::POST,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Options => Method::OPTIONS,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Patch => Method::PATCH,
    }
}

// Explicit nulls count as absent.
fn provided<'a>(args: &'a Map<String, Value>, param: &ToolParameter) -> Option<&'a Value> {
    args.get(&param.name).filter(|v| !v.is_null())
}

fn validate_value(param: &ToolParameter, value: &Value) -> Result<()> {
    let schema = to_json_schema(&param.schema);
    let validator = match jsonschema::validator_for(&schema) {
        Ok(validator) => validator,
        Err(e) => {
            tracing::warn!(
                parameter = %param.name,
                error = %e,
                "Schema does not compile, checking type and enum only"
            );
            return check_type_and_enum(param, &schema, value);
        }
    };
    if let Some(err) = validator.iter_errors(value).next() {
        let at = err.instance_path().to_string();
        let message = if at.is_empty() {
            err.to_string()
        } else {
            format!("{err} (at {at})")
        };
        return Err(HttpToolsError::validation(&param.name, message));
    }
    Ok(())
}

/// Rewrite `OpenAPI` 3.0 schema keywords into their JSON Schema 2020-12 form.
///
/// Boolean `exclusiveMinimum`/`exclusiveMaximum` become numeric bounds, `nullable: true` adds
/// `"null"` to `type`, and document-relative `$ref`s left behind by inlining are dropped.
#[must_use]
pub fn to_json_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out: Map<String, Value> = map
                .iter()
                .filter(|(k, v)| !(k.as_str() == "$ref" && v.is_string()))
                .map(|(k, v)| (k.clone(), to_json_schema(v)))
                .collect();
            exclusive_bound(&mut out, "exclusiveMinimum", "minimum");
            exclusive_bound(&mut out, "exclusiveMaximum", "maximum");
            if let Some(Value::Bool(nullable)) = out.remove("nullable")
                && nullable
            {
                allow_null(&mut out);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(to_json_schema).collect()),
        other => other.clone(),
    }
}

fn exclusive_bound(schema: &mut Map<String, Value>, exclusive: &str, inclusive: &str) {
    let Some(Value::Bool(flag)) = schema.get(exclusive) else {
        return;
    };
    let flag = *flag;
    schema.remove(exclusive);
    if flag && let Some(bound) = schema.remove(inclusive) {
        schema.insert(exclusive.to_string(), bound);
    }
}

fn allow_null(schema: &mut Map<String, Value>) {
    let widened = match schema.get("type") {
        Some(Value::String(t)) => Some(Value::from(vec![t.clone(), "null".to_string()])),
        Some(Value::Array(types)) if !types.iter().any(|t| t == "null") => {
            let mut types = types.clone();
            types.push(Value::from("null"));
            Some(Value::Array(types))
        }
        _ => None,
    };
    if let Some(types) = widened {
        schema.insert("type".to_string(), types);
    }
    if let Some(Value::Array(options)) = schema.get_mut("enum")
        && !options.contains(&Value::Null)
    {
        options.push(Value::Null);
    }
}

fn check_type_and_enum(param: &ToolParameter, schema: &Value, value: &Value) -> Result<()> {
    let type_matches = |t: &Value| t.as_str().is_some_and(|t| matches_type(t, value));
    let ok = match schema.get("type") {
        Some(Value::String(t)) => matches_type(t, value),
        Some(Value::Array(types)) => types.iter().any(type_matches),
        _ => true,
    };
    if !ok {
        return Err(HttpToolsError::validation(
            &param.name,
            format!(
                "{value} is not of type {}",
                schema.get("type").map(Value::to_string).unwrap_or_default()
            ),
        ));
    }
    if let Some(Value::Array(options)) = schema.get("enum")
        && !options.contains(value)
    {
        return Err(HttpToolsError::validation(
            &param.name,
            format!("{value} is not one of {}", Value::Array(options.clone())),
        ));
    }
    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "number" => value.is_number(),
        other => json_type_name(value) == other,
    }
}

fn log_unknown_arguments(tool: &Tool, args: &Map<String, Value>) {
    let known: Vec<&str> = tool.parameters.iter().map(|p| p.name.as_str()).collect();
    for key in args.keys().filter(|k| !known.contains(&k.as_str())) {
        match find_similar(key, &known) {
            Some(suggestion) => tracing::debug!(
                tool = %tool.name,
                "Ignoring unknown argument '{key}' (did you mean '{suggestion}'?)"
            ),
            None => tracing::debug!(tool = %tool.name, "Ignoring unknown argument '{key}'"),
        }
    }
}

fn find_similar<'a>(unknown: &str, known: &[&'a str]) -> Option<&'a str> {
    known
        .iter()
        .map(|k| (strsim::jaro(unknown, k), *k))
        .filter(|(score, _)| *score > 0.7)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, k)| k)
}

fn push_query(query: &mut Vec<QueryPair>, name: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items.iter().filter(|v| !v.is_null()) {
                query.push(QueryPair {
                    key: name.to_string(),
                    value: value_to_string(item),
                });
            }
        }
        other => query.push(QueryPair {
            key: name.to_string(),
            value: value_to_string(other),
        }),
    }
}

fn unfilled_placeholder(path: &str) -> Option<&str> {
    let start = path.find('{')?;
    let len = path[start + 1..].find('}')?;
    Some(&path[start + 1..start + 1 + len])
}

fn build_url(base_url: &str, path: &str, query: &[QueryPair]) -> Result<Url> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let mut url = Url::parse(&url)
        .map_err(|e| HttpToolsError::Config(format!("Invalid URL '{url}': {e}")))?;

    if !query.is_empty() {
        let joined = query
            .iter()
            .map(|p| format!("{}={}", encode_component(&p.key), encode_component(&p.value)))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&joined));
    }
    Ok(url)
}

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}

// Path and header arrays use the comma-joined `simple` style.
fn simple_style(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => value_to_string(other),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;
    use serde_json::json;

    fn param(name: &str, location: ParamLocation, required: bool, schema: Value) -> ToolParameter {
        ToolParameter {
            name: name.to_string(),
            location,
            param_type: schema["type"].as_str().unwrap_or("string").to_string(),
            required,
            default: schema.get("default").cloned(),
            description: None,
            schema,
            raw_body: false,
        }
    }

    fn create_issue() -> Tool {
        Tool {
            name: "createIssue".to_string(),
            description: "Create an issue".to_string(),
            method: HttpMethod::Post,
            path: "/repos/{owner}/{repo}/issues".to_string(),
            parameters: vec![
                param("owner", ParamLocation::Path, true, json!({"type": "string"})),
                param("repo", ParamLocation::Path, true, json!({"type": "string"})),
                param(
                    "state",
                    ParamLocation::Query,
                    false,
                    json!({"type": "string", "enum": ["open", "closed"], "default": "open"}),
                ),
                param("labels", ParamLocation::Query, false, json!({"type": "array"})),
                param("X-Request-Id", ParamLocation::Header, false, json!({"type": "string"})),
                param(
                    "title",
                    ParamLocation::Body,
                    true,
                    json!({"type": "string", "minLength": 1}),
                ),
                param("body", ParamLocation::Body, false, json!({"type": "string"})),
            ],
            response_schema: json!({}),
            operation_id: Some("createIssue".to_string()),
            tags: Vec::new(),
            deprecated: false,
            security: None,
        }
    }

    #[test]
    fn builds_path_query_headers_and_body() {
        let req = build_request(
            &create_issue(),
            "https://api.example.com/",
            &json!({
                "owner": "octo cat",
                "repo": "hello",
                "labels": ["bug", "ui"],
                "X-Request-Id": "r-1",
                "title": "Broken",
                "body": "details",
                "extra": 1
            }),
            &HeaderMap::new(),
            None,
        )
        .unwrap();

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url.path(), "/repos/octo%20cat/hello/issues");
        assert_eq!(
            req.url.query(),
            Some("state=open&labels=bug&labels=ui")
        );
        assert_eq!(req.headers["x-request-id"], "r-1");
        assert_eq!(req.headers[CONTENT_TYPE], "application/json");
        assert_eq!(req.body, Some(json!({"title": "Broken", "body": "details"})));
    }

    #[test]
    fn missing_required_is_reported_before_schema_errors() {
        let err = build_request(
            &create_issue(),
            "https://api.example.com",
            &json!({"owner": 5, "title": "x"}),
            &HeaderMap::new(),
            None,
        )
        .unwrap_err();
        match err {
            HttpToolsError::Validation { parameter, .. } => assert_eq!(parameter, "repo"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_counts_as_missing() {
        let err = build_request(
            &create_issue(),
            "https://api.example.com",
            &json!({"owner": "a", "repo": "b", "title": null}),
            &HeaderMap::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, HttpToolsError::Validation { ref parameter, .. } if parameter == "title"));
    }

    #[test]
    fn schema_violations_name_the_parameter() {
        let err = build_request(
            &create_issue(),
            "https://api.example.com",
            &json!({"owner": "a", "repo": "b", "title": "t", "state": "merged"}),
            &HeaderMap::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, HttpToolsError::Validation { ref parameter, .. } if parameter == "state"));

        let err = build_request(
            &create_issue(),
            "https://api.example.com",
            &json!({"owner": "a", "repo": "b", "title": ""}),
            &HeaderMap::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, HttpToolsError::Validation { ref parameter, .. } if parameter == "title"));
    }

    #[test]
    fn rejects_non_object_arguments() {
        let err = build_request(
            &create_issue(),
            "https://api.example.com",
            &json!([1, 2]),
            &HeaderMap::new(),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected an object, got array"));
    }

    #[test]
    fn auth_and_context_headers_override_parameters() {
        let mut tool = create_issue();
        tool.parameters
            .push(param("Authorization", ParamLocation::Header, false, json!({"type": "string"})));
        tool.parameters
            .push(param("api_key", ParamLocation::Query, false, json!({"type": "string"})));

        let mut ctx = HeaderMap::new();
        ctx.insert("x-request-id", HeaderValue::from_static("from-context"));
        let auth = AuthConfig::Bearer {
            token: "secret".to_string(),
        };
        let req = build_request(
            &tool,
            "https://api.example.com",
            &json!({
                "owner": "a", "repo": "b", "title": "t",
                "Authorization": "Bearer mine",
                "X-Request-Id": "from-args",
                "api_key": "caller"
            }),
            &ctx,
            Some(&auth),
        )
        .unwrap();
        assert_eq!(req.headers[AUTHORIZATION], "Bearer secret");
        assert_eq!(req.headers["x-request-id"], "from-context");

        let query_auth = AuthConfig::Query {
            name: "api_key".to_string(),
            value: "configured".to_string(),
        };
        let req = build_request(
            &tool,
            "https://api.example.com",
            &json!({"owner": "a", "repo": "b", "title": "t", "api_key": "caller"}),
            &HeaderMap::new(),
            Some(&query_auth),
        )
        .unwrap();
        assert_eq!(req.url.query(), Some("state=open&api_key=configured"));
    }

    #[test]
    fn raw_body_is_sent_verbatim() {
        let mut body = param("body", ParamLocation::Body, true, json!({"type": "array"}));
        body.raw_body = true;
        let tool = Tool {
            name: "bulkCreate".to_string(),
            description: "POST /items".to_string(),
            method: HttpMethod::Post,
            path: "/items".to_string(),
            parameters: vec![body],
            response_schema: json!({}),
            operation_id: None,
            tags: Vec::new(),
            deprecated: false,
            security: None,
        };
        let req = build_request(
            &tool,
            "http://localhost:8080/v1",
            &json!({"body": [{"id": 1}]}),
            &HeaderMap::new(),
            None,
        )
        .unwrap();
        assert_eq!(req.url.as_str(), "http://localhost:8080/v1/items");
        assert_eq!(req.body, Some(json!([{"id": 1}])));
    }

    #[test]
    fn unfilled_placeholder_is_a_validation_error() {
        let tool = Tool {
            name: "getThing".to_string(),
            description: String::new(),
            method: HttpMethod::Get,
            path: "/things/{thingId}".to_string(),
            parameters: Vec::new(),
            response_schema: json!({}),
            operation_id: None,
            tags: Vec::new(),
            deprecated: false,
            security: None,
        };
        let err = build_request(
            &tool,
            "http://localhost",
            &Value::Null,
            &HeaderMap::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, HttpToolsError::Validation { ref parameter, .. } if parameter == "thingId"));
    }

    fn list_items(limit_schema: Value) -> Tool {
        Tool {
            name: "listItems".to_string(),
            description: "GET /items".to_string(),
            method: HttpMethod::Get,
            path: "/items".to_string(),
            parameters: vec![param("limit", ParamLocation::Query, false, limit_schema)],
            response_schema: json!({}),
            operation_id: Some("listItems".to_string()),
            tags: Vec::new(),
            deprecated: false,
            security: None,
        }
    }

    fn limit_error(tool: &Tool, limit: Value) -> Option<String> {
        match build_request(
            tool,
            "https://api.example.com",
            &json!({"limit": limit}),
            &HeaderMap::new(),
            None,
        ) {
            Ok(_) => None,
            Err(HttpToolsError::Validation { parameter, message }) => {
                assert_eq!(parameter, "limit");
                Some(message)
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn openapi_30_exclusive_bounds_are_enforced() {
        let tool = list_items(json!({"type": "integer", "minimum": 1, "exclusiveMinimum": true}));
        assert!(limit_error(&tool, json!("not-a-number")).is_some());
        assert!(limit_error(&tool, json!(1)).is_some());
        assert!(limit_error(&tool, json!(2)).is_none());

        let tool = list_items(json!({"type": "integer", "maximum": 10, "exclusiveMaximum": false}));
        assert!(limit_error(&tool, json!(10)).is_none());
        assert!(limit_error(&tool, json!(11)).is_some());
    }

    #[test]
    fn nullable_and_leftover_refs_are_rewritten() {
        assert_eq!(
            to_json_schema(&json!({
                "type": "object",
                "properties": {
                    "state": {"type": "string", "enum": ["open"], "nullable": true},
                    "next": {"$ref": "#/components/schemas/Node"}
                }
            })),
            json!({
                "type": "object",
                "properties": {
                    "state": {"type": ["string", "null"], "enum": ["open", null]},
                    "next": {}
                }
            })
        );
    }

    #[test]
    fn uncompilable_schema_still_checks_type_and_enum() {
        let tool = list_items(json!({"type": "integer", "minimum": "one"}));
        let message = limit_error(&tool, json!("ten")).expect("type mismatch");
        assert!(message.contains("integer"), "{message}");
        assert!(limit_error(&tool, json!(10)).is_none());

        let tool = list_items(json!({"enum": [10, 20], "maxItems": "x"}));
        assert!(limit_error(&tool, json!(30)).is_some());
        assert!(limit_error(&tool, json!(20)).is_none());
    }

    #[test]
    fn suggests_close_parameter_names() {
        assert_eq!(find_similar("titel", &["title", "owner"]), Some("title"));
        assert_eq!(find_similar("zzz", &["title", "owner"]), None);
    }
}
