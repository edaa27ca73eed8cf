#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::get;
use axum::{Json, Router};
use ocp_agent::{AgentConfig, OcpAgent};
use ocp_context::headers::OCP_SESSION;
use ocp_context::{context_headers, parse_context};
use ocp_test_support::{HitCounter, MockServer};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;

pub use ocp_test_support::init_tracing;

pub const GITHUB_SPEC: &str = r##"
openapi: 3.0.3
info: { title: GitHub, version: "1.1.4", description: Issues API }
servers: [{ url: "https://api.github.com" }]
components:
  schemas:
    NewIssue:
      type: object
      required: [title]
      properties:
        title: { type: string }
        body: { type: string }
paths:
  /repos/{owner}/{repo}/issues:
    parameters:
      - { name: owner, in: path, required: true, schema: { type: string } }
      - { name: repo, in: path, required: true, schema: { type: string } }
    post:
      operationId: createIssue
      tags: [issues]
      summary: Create an issue
      requestBody:
        required: true
        content:
          application/json:
            schema: { $ref: "#/components/schemas/NewIssue" }
      responses:
        "201": { description: created }
    get:
      tags: [issues]
      parameters:
        - { name: state, in: query, schema: { type: string, enum: [open, closed], default: open } }
      responses:
        "200": { description: ok }
"##;

pub const GITLAB_SPEC: &str = r##"
openapi: 3.0.0
info: { title: GitLab, version: "4" }
servers: [{ url: "https://gitlab.example.com" }]
paths:
  /projects/{id}/issues:
    post:
      operationId: createIssue
      parameters:
        - { name: id, in: path, required: true, schema: { type: integer } }
      responses:
        "201": { description: created }
"##;

/// Goal the mock upstream writes into contexts it echoes back.
pub const UPSTREAM_GOAL: &str = "Follow up on issue #42";

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Shared view of what the mock upstream received.
#[derive(Clone, Default)]
pub struct Upstream {
    pub seen: Arc<Mutex<Vec<SeenRequest>>>,
    pub spec_hits: HitCounter,
    pub registry_hits: HitCounter,
    base: Arc<RwLock<String>>,
}

impl Upstream {
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

async fn serve_spec(State(up): State<Upstream>, Path(name): Path<String>) -> (StatusCode, String) {
    up.spec_hits.hit();
    match name.as_str() {
        "github.yaml" => (StatusCode::OK, GITHUB_SPEC.to_string()),
        "gitlab.yaml" => (StatusCode::OK, GITLAB_SPEC.to_string()),
        "swagger.yaml" => (
            StatusCode::OK,
            "swagger: '2.0'\ninfo: { title: old, version: '1' }\npaths: {}\n".to_string(),
        ),
        _ => (StatusCode::NOT_FOUND, String::new()),
    }
}

async fn registry_entry(
    State(up): State<Upstream>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    up.registry_hits.hit();
    if name != "github" {
        return Err(StatusCode::NOT_FOUND);
    }
    let base = up.base.read().clone();
    Ok(Json(json!({
        "name": "github",
        "display_name": "GitHub",
        "openapi_url": format!("{base}/specs/github.yaml"),
        "base_url": base,
    })))
}

async fn registry_search(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let q = params.get("q").map(|q| q.to_lowercase()).unwrap_or_default();
    let catalog = [
        ("github", "GitHub", "Repositories, issues and pull requests"),
        ("gitlab", "GitLab", "DevOps platform"),
        ("stripe", "Stripe", "Payments"),
    ];
    let results: Vec<Value> = catalog
        .iter()
        .filter(|(name, display, desc)| {
            [name, display, desc]
                .iter()
                .any(|field| field.to_lowercase().contains(&q))
        })
        .map(|(name, display, desc)| {
            json!({ "name": name, "display_name": display, "description": desc })
        })
        .collect();
    Json(json!({ "query": q, "results": results, "total": results.len(), "page": 1, "per_page": 10 }))
}

async fn registry_list() -> Json<Value> {
    Json(json!([{ "name": "github" }, { "name": "gitlab" }, { "name": "stripe" }]))
}

async fn create_issue(
    State(up): State<Upstream>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, HeaderMap, Json<Value>) {
    let title = body.get("title").cloned().unwrap_or(Value::Null);
    let mut reply = HeaderMap::new();
    if let Some(mut ctx) = parse_context(&headers)
        && ctx.update_goal(UPSTREAM_GOAL).is_ok()
        && let Ok(encoded) = context_headers(&ctx)
        && let Some(session) = encoded.get(OCP_SESSION)
    {
        reply.insert(OCP_SESSION, session.clone());
    }
    up.seen.lock().push(SeenRequest {
        method: "POST".to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    });
    (StatusCode::CREATED, reply, Json(json!({ "number": 42, "title": title })))
}

async fn list_issues(State(up): State<Upstream>, uri: Uri, headers: HeaderMap) -> Json<Value> {
    up.seen.lock().push(SeenRequest {
        method: "GET".to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: Value::Null,
    });
    Json(json!([]))
}

/// One server playing spec host, registry and GitHub-like API.
pub async fn start_upstream() -> anyhow::Result<(MockServer, Upstream)> {
    let up = Upstream::default();
    let app = Router::new()
        .route("/specs/{name}", get(serve_spec))
        .route("/api/v1/registry", get(registry_list))
        .route("/api/v1/registry/{name}", get(registry_entry))
        .route("/api/v1/search", get(registry_search))
        .route(
            "/repos/{owner}/{repo}/issues",
            get(list_issues).post(create_issue),
        )
        .with_state(up.clone());
    let server = MockServer::start(app).await?;
    *up.base.write() = server.base_url();
    Ok((server, up))
}

/// Agent config pointing at `server` for the registry, storing under `root` when given.
pub fn config(server: &MockServer, root: Option<&FsPath>) -> AgentConfig {
    let mut cfg = AgentConfig::new("ide_coding_assistant");
    cfg.user = Some("alice".to_string());
    cfg.workspace = Some("ocp-rs".to_string());
    cfg.goal = Some("Triage failing builds".to_string());
    cfg.registry_url = server.base_url();
    cfg.fetch_timeout_secs = 5;
    cfg.request_timeout_secs = 5;
    match root {
        Some(dir) => cfg.cache_dir = Some(dir.to_path_buf()),
        None => cfg.enable_cache = false,
    }
    cfg
}

pub fn agent(server: &MockServer, root: Option<&FsPath>) -> anyhow::Result<OcpAgent> {
    Ok(OcpAgent::from_config(&config(server, root))?)
}
