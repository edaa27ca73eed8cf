mod common;

use anyhow::Context as _;
use common::{UPSTREAM_GOAL, agent, init_tracing, start_upstream};
use ocp_agent::{AgentError, ApiConfig};
use ocp_context::headers::OCP_SESSION;
use ocp_context::{decode, parse_context};
use ocp_http_tools::AuthConfig;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn create_issue_validates_then_sends_with_context() -> anyhow::Result<()> {
    init_tracing();
    let (server, upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;
    let cancel = CancellationToken::new();

    agent
        .register_api(
            &ApiConfig::new("github")
                .with_spec_url(server.url("/specs/github.yaml"))
                .with_base_url(server.base_url()),
            &cancel,
        )
        .await
        .context("register github")?;
    let history_before = agent.context().history_len();

    let err = agent
        .call_tool("createIssue", json!({"owner": "a", "repo": "b"}), None, &cancel)
        .await
        .expect_err("title is required");
    match err {
        AgentError::Validation { parameter, .. } => assert_eq!(parameter, "title"),
        other => panic!("expected a validation error, got {other}"),
    }
    assert!(upstream.requests().is_empty());
    assert_eq!(agent.context().history_len(), history_before);

    let sent_context = agent.context();
    let result = agent
        .call_tool(
            "createIssue",
            json!({"owner": "a", "repo": "b", "title": "x"}),
            None,
            &cancel,
        )
        .await?;
    assert_eq!(result.status, 201);
    assert!(result.is_success());
    assert_eq!(result.api, "github");
    assert_eq!(result.body, json!({"number": 42, "title": "x"}));

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/repos/a/b/issues");
    assert_eq!(req.body, json!({"title": "x"}));

    let header = req
        .headers
        .get(OCP_SESSION)
        .context("OCP-Session header missing")?
        .to_str()?;
    let on_wire = decode(header).context("OCP-Session did not decode")?;
    assert_eq!(on_wire.context_id(), sent_context.context_id());
    assert_eq!(on_wire.current_goal(), Some("Triage failing builds"));
    assert_eq!(
        req.headers.get("ocp-agent-type").and_then(|v| v.to_str().ok()),
        Some("ide_coding_assistant")
    );

    // The upstream echoed an updated context; it is merged back in.
    assert!(parse_context(&result.headers).is_some());
    let after = agent.context();
    assert_eq!(after.current_goal(), Some(UPSTREAM_GOAL));
    let last = after.history().last().context("history empty")?;
    assert_eq!(last.action, "tool_call:createIssue");
    assert_eq!(last.result.as_deref(), Some("201"));
    assert_eq!(last.api_name.as_deref(), Some("github"));
    Ok(())
}

#[tokio::test]
async fn large_contexts_travel_gzipped() -> anyhow::Result<()> {
    let (server, upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;
    let cancel = CancellationToken::new();
    agent
        .register_api(
            &ApiConfig::new("github")
                .with_spec_url(server.url("/specs/github.yaml"))
                .with_base_url(server.base_url()),
            &cancel,
        )
        .await?;

    for i in 0..10 {
        agent.add_recent_change(&format!(
            "crates/ci/src/pipeline_{i}.rs: retry flaky integration jobs before reporting failure"
        ));
    }
    let trace = "thread 'main' panicked at crates/ci/src/runner.rs:88: job timed out\n".repeat(12);
    agent.set_error_context(&trace, Some("crates/ci/src/runner.rs"));
    let sent = agent.context();
    assert!(serde_json::to_vec(&sent.to_value()?)?.len() > 1024);

    agent
        .call_tool(
            "createIssue",
            json!({"owner": "a", "repo": "b", "title": "CI is flaky"}),
            None,
            &cancel,
        )
        .await?;

    let requests = upstream.requests();
    let req = &requests[0];
    let header = req
        .headers
        .get(OCP_SESSION)
        .context("OCP-Session header missing")?
        .to_str()?;
    // Base64 of the gzip magic bytes.
    assert!(header.starts_with("H4sI"), "header was not compressed: {header}");

    let on_wire = parse_context(&req.headers).context("upstream could not decode the context")?;
    assert_eq!(on_wire.context_id(), sent.context_id());
    assert_eq!(on_wire.error_context(), Some(trace.as_str()));
    assert_eq!(on_wire.recent_changes(), sent.recent_changes());

    // The echo is gzipped too and still merges.
    assert_eq!(agent.context().current_goal(), Some(UPSTREAM_GOAL));
    Ok(())
}

#[tokio::test]
async fn defaults_and_auth_are_applied() -> anyhow::Result<()> {
    let (server, upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;
    let cancel = CancellationToken::new();
    agent
        .register_api(
            &ApiConfig::new("github")
                .with_spec_url(server.url("/specs/github.yaml"))
                .with_base_url(server.base_url())
                .with_auth(AuthConfig::Bearer {
                    token: "ghp_test".to_string(),
                }),
            &cancel,
        )
        .await?;

    let result = agent
        .call_tool(
            "getReposOwnerRepoIssues",
            json!({"owner": "octo cat", "repo": "hello"}),
            Some("github"),
            &cancel,
        )
        .await?;
    assert_eq!(result.status, 200);

    let requests = upstream.requests();
    let req = &requests[0];
    assert_eq!(req.method, "GET");
    assert_eq!(req.path, "/repos/octo%20cat/hello/issues");
    assert_eq!(req.query.as_deref(), Some("state=open"));
    assert_eq!(
        req.headers.get("authorization").and_then(|v| v.to_str().ok()),
        Some("Bearer ghp_test")
    );
    Ok(())
}

#[tokio::test]
async fn transport_failures_are_recorded() -> anyhow::Result<()> {
    let (server, _upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;
    let cancel = CancellationToken::new();
    agent
        .register_api(
            &ApiConfig::new("github")
                .with_spec_url(server.url("/specs/github.yaml"))
                .with_base_url("http://127.0.0.1:9"),
            &cancel,
        )
        .await?;

    let err = agent
        .call_tool(
            "createIssue",
            json!({"owner": "a", "repo": "b", "title": "x"}),
            None,
            &cancel,
        )
        .await
        .expect_err("nothing listens on port 9");
    assert!(matches!(err, AgentError::Http(_)), "got {err}");

    let ctx = agent.context();
    let last = ctx.history().last().context("history empty")?;
    assert_eq!(last.action, "tool_error:createIssue");
    assert!(last.result.as_deref().is_some_and(|r| r.starts_with("Error:")));
    Ok(())
}

#[tokio::test]
async fn cancelled_calls_are_not_sent() -> anyhow::Result<()> {
    let (server, upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;
    agent
        .register_api(
            &ApiConfig::new("github")
                .with_spec_url(server.url("/specs/github.yaml"))
                .with_base_url(server.base_url()),
            &CancellationToken::new(),
        )
        .await?;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = agent
        .call_tool(
            "createIssue",
            json!({"owner": "a", "repo": "b", "title": "x"}),
            None,
            &cancel,
        )
        .await
        .expect_err("cancelled");
    assert!(matches!(err, AgentError::Cancelled));
    assert!(upstream.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_tools_list_what_is_available() -> anyhow::Result<()> {
    let (server, _upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;
    let cancel = CancellationToken::new();
    agent
        .register_api(
            &ApiConfig::new("github")
                .with_spec_url(server.url("/specs/github.yaml"))
                .with_base_url(server.base_url()),
            &cancel,
        )
        .await?;

    match agent
        .call_tool("closeIssue", json!({}), None, &cancel)
        .await
        .expect_err("no such tool")
    {
        AgentError::ToolNotFound { name, available } => {
            assert_eq!(name, "closeIssue");
            assert_eq!(available, vec!["createIssue", "getReposOwnerRepoIssues"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let doc = agent.tool_documentation("createIssue", None)?;
    assert!(doc.contains("## createIssue"));
    assert!(doc.contains("**Read-only:** no"));
    Ok(())
}
