//! Saved contexts, one JSON file per session under `<root>/sessions`.

use crate::error::{AgentError, Result};
use chrono::{DateTime, Utc};
use ocp_context::{Context, validate_context_id};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Listing row for a saved session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub agent_type: String,
    pub current_goal: Option<String>,
    pub interaction_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl SessionSummary {
    fn of(session_id: &str, context: &Context) -> Self {
        Self {
            session_id: session_id.to_string(),
            agent_type: context.agent_type().to_string(),
            current_goal: context.current_goal().map(str::to_string),
            interaction_count: context.session().interaction_count,
            last_updated: context.last_updated(),
        }
    }
}

pub trait SessionStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the session cannot be written.
    fn save(&self, session_id: &str, context: &Context) -> Result<()>;

    /// `Ok(None)` when no session with that id exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the stored session is unreadable.
    fn load(&self, session_id: &str) -> Result<Option<Context>>;

    /// Most recently updated first, at most `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn list(&self, limit: usize) -> Result<Vec<SessionSummary>>;

    /// # Errors
    ///
    /// Returns an error if the id is invalid or the session cannot be removed.
    fn delete(&self, session_id: &str) -> Result<bool>;
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    session_id: String,
    saved_at: DateTime<Utc>,
    context: Value,
}

#[derive(Debug, Clone)]
pub struct FsSessionStore {
    dir: PathBuf,
}

impl FsSessionStore {
    /// # Errors
    ///
    /// Returns an error if the sessions directory cannot be created.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join("sessions");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_context_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    fn read(&self, path: &Path) -> Result<Option<StoredSession>> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn parse(&self, path: &Path) -> Result<Option<(String, Context)>> {
        match self.read(path)? {
            Some(stored) => Ok(Some((
                stored.session_id,
                Context::from_value(stored.context)?,
            ))),
            None => Ok(None),
        }
    }

    /// Readable sessions newest first, plus the paths of session files that failed to parse.
    fn scan(&self) -> Result<(Vec<SessionSummary>, Vec<PathBuf>)> {
        let mut sessions = Vec::new();
        let mut unreadable = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.parse(&path) {
                Ok(Some((id, context))) => sessions.push(SessionSummary::of(&id, &context)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unreadable session file");
                    unreadable.push(path);
                }
            }
        }
        sessions.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok((sessions, unreadable))
    }

    /// Delete all but the `keep` most recently updated sessions, and any session file that no
    /// longer parses. Returns how many files were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated or a file cannot be removed.
    pub fn cleanup(&self, keep: usize) -> Result<usize> {
        let (sessions, unreadable) = self.scan()?;
        let mut removed = 0;
        for summary in sessions.iter().skip(keep) {
            if self.delete(&summary.session_id)? {
                removed += 1;
            }
        }
        for path in &unreadable {
            std::fs::remove_file(path)?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(
                removed,
                kept = keep,
                unreadable = unreadable.len(),
                "Cleaned up saved sessions"
            );
        }
        Ok(removed)
    }
}

impl SessionStore for FsSessionStore {
    fn save(&self, session_id: &str, context: &Context) -> Result<()> {
        let path = self.path_for(session_id)?;
        let stored = StoredSession {
            session_id: session_id.to_string(),
            saved_at: Utc::now(),
            context: context.to_value()?,
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&stored)?)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(session = %session_id, "Saved session");
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<Context>> {
        let path = self.path_for(session_id)?;
        match self.read(&path)? {
            Some(stored) => Ok(Some(Context::from_value(stored.context)?)),
            None => Ok(None),
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let (mut sessions, _) = self.scan()?;
        sessions.truncate(limit);
        Ok(sessions)
    }

    fn delete(&self, session_id: &str) -> Result<bool> {
        match std::fs::remove_file(self.path_for(session_id)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentError::Io(e)),
        }
    }
}
