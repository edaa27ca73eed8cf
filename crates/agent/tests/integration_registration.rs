mod common;

use common::{agent, config, start_upstream};
use ocp_agent::{AgentError, ApiConfig, OcpAgent};
use serde_json::json;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn one_bad_api_does_not_block_the_others() -> anyhow::Result<()> {
    let (server, _upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;

    let apis = vec![
        ApiConfig::new("github")
            .with_spec_url(server.url("/specs/github.yaml"))
            .with_base_url(server.base_url()),
        ApiConfig::new("legacy").with_spec_url(server.url("/specs/swagger.yaml")),
        ApiConfig::new("missing").with_spec_url(server.url("/specs/missing.yaml")),
    ];
    let results = agent.register_apis(&apis, &CancellationToken::new()).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "github");
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(AgentError::Schema { ref api, .. }) if api == "legacy"));
    match &results[2].1 {
        Err(AgentError::SpecFetch { url, message }) => {
            assert!(url.ends_with("/specs/missing.yaml"));
            assert!(message.contains("404"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(agent.api_names(), vec!["github"]);
    assert_eq!(agent.list_tools(None)?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn shared_tool_names_need_an_api() -> anyhow::Result<()> {
    let (server, upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;
    let cancel = CancellationToken::new();
    let apis = vec![
        ApiConfig::new("github")
            .with_spec_url(server.url("/specs/github.yaml"))
            .with_base_url(server.base_url()),
        ApiConfig::new("gitlab")
            .with_spec_url(server.url("/specs/gitlab.yaml"))
            .with_base_url(server.base_url()),
    ];
    for (name, result) in agent.register_apis(&apis, &cancel).await {
        assert!(result.is_ok(), "{name} failed to register");
    }

    let err = agent
        .call_tool("createIssue", json!({"title": "x"}), None, &cancel)
        .await
        .expect_err("ambiguous");
    match err {
        AgentError::AmbiguousTool { name, apis } => {
            assert_eq!(name, "createIssue");
            assert_eq!(apis, vec!["github", "gitlab"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(upstream.requests().is_empty());

    let result = agent
        .call_tool(
            "createIssue",
            json!({"owner": "a", "repo": "b", "title": "x"}),
            Some("github"),
            &cancel,
        )
        .await?;
    assert_eq!(result.api, "github");

    assert_eq!(agent.search_tools("issue", Some("gitlab"))?.len(), 1);
    assert_eq!(agent.tools_by_tag("issues", None)?.len(), 2);
    assert!(matches!(
        agent.list_tools(Some("stripe")),
        Err(AgentError::UnknownApi(_))
    ));
    Ok(())
}

#[tokio::test]
async fn sessions_survive_a_new_agent() -> anyhow::Result<()> {
    let (server, _upstream) = start_upstream().await?;
    let root = tempdir()?;

    let first = agent(&server, Some(root.path()))?;
    first.update_goal("Ship 1.0", Some("Release checklist in progress"))?;
    first.update_workspace("ocp-rs-release")?;
    first.add_recent_change("bumped version");
    let saved = first.save_session()?;

    let second = OcpAgent::from_config(&config(&server, Some(root.path())))?;
    assert_ne!(second.context().context_id(), saved);
    assert!(second.load_session(&saved)?);

    let ctx = second.context();
    assert_eq!(ctx.context_id(), saved);
    assert_eq!(ctx.current_goal(), Some("Ship 1.0"));
    assert_eq!(ctx.context_summary(), Some("Release checklist in progress"));
    assert_eq!(ctx.workspace(), Some("ocp-rs-release"));
    assert_eq!(ctx.recent_changes(), ["bumped version".to_string()]);

    let listed = second.list_sessions(10)?;
    assert_eq!(listed.len(), 1);
    assert!(!second.load_session("ocp-00000000")?);
    Ok(())
}

#[tokio::test]
async fn sessions_need_a_store() -> anyhow::Result<()> {
    let (server, _upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;
    assert!(matches!(agent.save_session(), Err(AgentError::Config(_))));
    Ok(())
}

#[tokio::test]
async fn over_long_goals_are_rejected() -> anyhow::Result<()> {
    let (server, _upstream) = start_upstream().await?;
    let agent = agent(&server, None)?;
    let before = agent.context();
    assert!(agent.update_goal(&"g".repeat(300), None).is_err());
    assert_eq!(agent.context().current_goal(), before.current_goal());
    Ok(())
}
