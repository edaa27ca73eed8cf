//! The agent [`Context`]: the serializable session/workspace state carried across tool calls.
//!
//! Identity (`contextId`, `agentType`) is fixed at construction. Everything else changes only
//! through the mutators on [`Context`], each of which refreshes `lastUpdated`.

use crate::error::{ContextError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};

pub const MAX_CONTEXT_ID_LEN: usize = 64;
pub const MAX_AGENT_TYPE_LEN: usize = 128;
pub const MAX_USER_LEN: usize = 64;
pub const MAX_WORKSPACE_LEN: usize = 128;
pub const MAX_GOAL_LEN: usize = 256;

/// Default number of history entries kept before the oldest are pruned.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

const MAX_RECENT_CHANGES: usize = 10;

/// One recorded interaction in the context history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Session bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub interaction_count: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            start_time: Utc::now(),
            interaction_count: 0,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

/// Agent context flowing through OCP-enabled API calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    context_id: String,
    agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workspace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    recent_changes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    api_specs: BTreeMap<String, String>,
    #[serde(default)]
    history: VecDeque<Interaction>,
    #[serde(default)]
    session: SessionInfo,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    last_updated: DateTime<Utc>,
}

impl Context {
    /// Create a fresh context with a generated id.
    ///
    /// # Errors
    ///
    /// Returns an error if `agent_type` is empty or any field exceeds its length bound.
    pub fn create(
        agent_type: &str,
        user: Option<&str>,
        workspace: Option<&str>,
        goal: Option<&str>,
    ) -> Result<Self> {
        if agent_type.is_empty() {
            return Err(ContextError::EmptyField {
                field: "agentType",
            });
        }
        check_len("agentType", agent_type, MAX_AGENT_TYPE_LEN)?;
        if let Some(u) = user {
            check_len("user", u, MAX_USER_LEN)?;
        }
        if let Some(w) = workspace {
            check_len("workspace", w, MAX_WORKSPACE_LEN)?;
        }
        if let Some(g) = goal {
            check_len("currentGoal", g, MAX_GOAL_LEN)?;
        }

        let context_id = generate_context_id();
        validate_context_id(&context_id)?;

        let now = Utc::now();
        Ok(Self {
            context_id,
            agent_type: agent_type.to_string(),
            user: user.map(str::to_string),
            workspace: workspace.map(str::to_string),
            current_goal: goal.map(str::to_string),
            current_file: None,
            context_summary: None,
            error_context: None,
            recent_changes: Vec::new(),
            api_specs: BTreeMap::new(),
            history: VecDeque::new(),
            session: SessionInfo {
                start_time: now,
                interaction_count: 0,
                history_limit: DEFAULT_HISTORY_LIMIT,
            },
            created_at: now,
            last_updated: now,
        })
    }

    /// Override the history bound (oldest entries beyond it are pruned immediately).
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.session.history_limit = limit;
        self.prune_history();
        self
    }

    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    #[must_use]
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    #[must_use]
    pub fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref()
    }

    #[must_use]
    pub fn current_goal(&self) -> Option<&str> {
        self.current_goal.as_deref()
    }

    #[must_use]
    pub fn current_file(&self) -> Option<&str> {
        self.current_file.as_deref()
    }

    #[must_use]
    pub fn context_summary(&self) -> Option<&str> {
        self.context_summary.as_deref()
    }

    #[must_use]
    pub fn error_context(&self) -> Option<&str> {
        self.error_context.as_deref()
    }

    #[must_use]
    pub fn recent_changes(&self) -> &[String] {
        &self.recent_changes
    }

    #[must_use]
    pub fn api_specs(&self) -> &BTreeMap<String, String> {
        &self.api_specs
    }

    /// History, oldest first.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &Interaction> {
        self.history.iter()
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Append an interaction, bump the interaction counter and prune the oldest entries
    /// beyond the history bound.
    pub fn record_interaction(
        &mut self,
        action: &str,
        api_name: Option<&str>,
        operation: Option<&str>,
        result: Option<&str>,
    ) {
        let now = Utc::now();
        self.history.push_back(Interaction {
            timestamp: now,
            action: action.to_string(),
            api_name: api_name.map(str::to_string),
            operation: operation.map(str::to_string),
            result: result.map(str::to_string),
        });
        self.session.interaction_count = self.session.interaction_count.saturating_add(1);
        self.prune_history();
        self.last_updated = now;
    }

    /// Overwrite the current goal.
    ///
    /// # Errors
    ///
    /// Returns an error if the goal exceeds 256 chars.
    pub fn update_goal(&mut self, goal: &str) -> Result<()> {
        check_len("currentGoal", goal, MAX_GOAL_LEN)?;
        self.current_goal = Some(goal.to_string());
        self.touch();
        Ok(())
    }

    /// Overwrite the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace exceeds 128 chars.
    pub fn update_workspace(&mut self, workspace: &str) -> Result<()> {
        check_len("workspace", workspace, MAX_WORKSPACE_LEN)?;
        self.workspace = Some(workspace.to_string());
        self.touch();
        Ok(())
    }

    /// Overwrite the user.
    ///
    /// # Errors
    ///
    /// Returns an error if the user exceeds 64 chars.
    pub fn update_user(&mut self, user: &str) -> Result<()> {
        check_len("user", user, MAX_USER_LEN)?;
        self.user = Some(user.to_string());
        self.touch();
        Ok(())
    }

    pub fn set_context_summary(&mut self, summary: Option<&str>) {
        self.context_summary = summary.map(str::to_string);
        self.touch();
    }

    /// Record an error being debugged, optionally with the file it concerns.
    pub fn set_error_context(&mut self, error: &str, file: Option<&str>) {
        self.error_context = Some(error.to_string());
        if let Some(f) = file {
            self.current_file = Some(f.to_string());
        }
        self.touch();
    }

    pub fn clear_error_context(&mut self) {
        self.error_context = None;
        self.touch();
    }

    /// Track a recent change; only the last 10 are kept.
    pub fn add_recent_change(&mut self, change: &str) {
        self.recent_changes.push(change.to_string());
        if self.recent_changes.len() > MAX_RECENT_CHANGES {
            let excess = self.recent_changes.len() - MAX_RECENT_CHANGES;
            self.recent_changes.drain(..excess);
        }
        self.touch();
    }

    /// Remember where an API's spec came from (URL, `registry:<name>`, or `cache`).
    pub fn add_api_spec(&mut self, api_name: &str, source: &str) {
        self.api_specs
            .insert(api_name.to_string(), source.to_string());
        self.touch();
    }

    /// One-line summary of the conversation state.
    #[must_use]
    pub fn conversation_summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(goal) = &self.current_goal {
            parts.push(format!("Goal: {goal}"));
        }
        if let Some(err) = &self.error_context {
            parts.push(format!("Error: {err}"));
        }
        if let Some(file) = &self.current_file {
            parts.push(format!("Working on: {file}"));
        }
        if !self.recent_changes.is_empty() {
            let start = self.recent_changes.len().saturating_sub(3);
            parts.push(format!(
                "Recent changes: {}",
                self.recent_changes[start..].join(", ")
            ));
        }
        if !self.history.is_empty() {
            let start = self.history.len().saturating_sub(3);
            let actions: Vec<&str> = self
                .history
                .iter()
                .skip(start)
                .map(|h| h.action.as_str())
                .collect();
            parts.push(format!("Recent actions: {}", actions.join(", ")));
        }

        if parts.is_empty() {
            "New conversation".to_string()
        } else {
            parts.join(" | ")
        }
    }

    /// Copy this context under a fresh id (for forked workflows).
    #[must_use]
    pub fn fork(&self) -> Self {
        let mut forked = self.clone();
        forked.context_id = generate_context_id();
        forked.touch();
        forked
    }

    /// Adopt state from a context decoded off a response: goal and summary when present, and
    /// history entries not already recorded. Identity is kept.
    pub fn merge_from(&mut self, other: &Context) {
        if let Some(goal) = &other.current_goal
            && self.current_goal.as_ref() != Some(goal)
        {
            self.current_goal = Some(goal.clone());
        }
        if other.context_summary.is_some() {
            self.context_summary.clone_from(&other.context_summary);
        }

        let seen: HashSet<(DateTime<Utc>, String)> = self
            .history
            .iter()
            .map(|h| (h.timestamp, h.action.clone()))
            .collect();
        for interaction in &other.history {
            if !seen.contains(&(interaction.timestamp, interaction.action.clone())) {
                self.history.push_back(interaction.clone());
            }
        }
        self.prune_history();
        self.touch();
    }

    /// Serialize to a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize and validate a JSON document produced by [`Self::to_value`] (or a peer).
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or the identity fields are invalid.
    pub fn from_value(value: Value) -> Result<Self> {
        let ctx: Context = serde_json::from_value(value)
            .map_err(|e| ContextError::InvalidDocument(e.to_string()))?;
        ctx.validate()?;
        Ok(ctx)
    }

    /// Check identity and field bounds.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        validate_context_id(&self.context_id)?;
        if self.agent_type.is_empty() {
            return Err(ContextError::EmptyField {
                field: "agentType",
            });
        }
        check_len("agentType", &self.agent_type, MAX_AGENT_TYPE_LEN)?;
        if let Some(u) = &self.user {
            check_len("user", u, MAX_USER_LEN)?;
        }
        if let Some(w) = &self.workspace {
            check_len("workspace", w, MAX_WORKSPACE_LEN)?;
        }
        if let Some(g) = &self.current_goal {
            check_len("currentGoal", g, MAX_GOAL_LEN)?;
        }
        Ok(())
    }

    /// Drop the oldest history entry. Returns `false` when history is already empty.
    pub(crate) fn drop_oldest_interaction(&mut self) -> bool {
        self.history.pop_front().is_some()
    }

    fn prune_history(&mut self) {
        while self.history.len() > self.session.history_limit {
            self.history.pop_front();
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

fn generate_context_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("ocp-{}", &hex[..8])
}

/// Validate a context id against `[A-Za-z0-9-]{1,64}`.
///
/// # Errors
///
/// Returns [`ContextError::InvalidContextId`] if the id is empty, too long, or has other chars.
pub fn validate_context_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= MAX_CONTEXT_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(ContextError::InvalidContextId(id.to_string()))
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(ContextError::FieldTooLong { field, len, max });
    }
    Ok(())
}
