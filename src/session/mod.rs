// Chat session persistence
// One pretty-printed JSON file per session under the history directory

#[cfg(test)]
mod tests;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{RagError, Result};

const SESSION_EXTENSION: &str = "json";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Listing entry for a stored session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub last_modified: DateTime<Utc>,
}

/// File-backed store of chat transcripts
#[derive(Debug)]
pub struct SessionStore {
    history_dir: PathBuf,
    issued_ids: Mutex<HashSet<String>>,
}

impl SessionStore {
    /// Open the store, creating the history directory if needed
    #[inline]
    pub fn new(history_dir: impl Into<PathBuf>) -> Result<Self> {
        let history_dir = history_dir.into();
        fs::create_dir_all(&history_dir).map_err(|e| {
            RagError::Session(format!(
                "Failed to create history directory {}: {}",
                history_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            history_dir,
            issued_ids: Mutex::new(HashSet::new()),
        })
    }

    #[inline]
    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    /// Produce a new, sortable session identifier.
    ///
    /// The id is the local timestamp to the second. When that id was already
    /// handed out by this store or exists on disk, a random suffix is added.
    #[inline]
    pub fn generate_session_id(&self) -> String {
        let base = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut issued = self
            .issued_ids
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut id = base.clone();
        while issued.contains(&id) || self.session_path_unchecked(&id).exists() {
            let suffix = Uuid::new_v4().simple().to_string();
            id = format!("{}_{}", base, &suffix[..8]);
        }

        issued.insert(id.clone());
        debug!("Generated session id {}", id);
        id
    }

    /// Persist the full message list, replacing any previous state
    #[inline]
    pub fn save_session(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        if session_id.is_empty() {
            return Ok(());
        }

        let path = self.session_path(session_id)?;
        let content = serde_json::to_string_pretty(messages)
            .map_err(|e| RagError::Session(format!("Failed to serialize session: {}", e)))?;

        // Write beside the target, then rename over it
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &path)?;

        debug!(
            "Saved session {} ({} messages)",
            session_id,
            messages.len()
        );
        Ok(())
    }

    /// Load a session's messages; a missing session is empty
    #[inline]
    pub fn load_session(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.session_path(session_id)?;

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| {
            RagError::Session(format!("Session {} is corrupt: {}", session_id, e))
        })
    }

    /// All stored sessions, newest first
    #[inline]
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();

        for entry in fs::read_dir(&self.history_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Skipping session {}: {}", path.display(), e);
                    continue;
                }
            };

            sessions.push(SessionSummary {
                id: id.to_string(),
                last_modified: DateTime::<Utc>::from(modified),
            });
        }

        sessions.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(sessions)
    }

    /// Remove a session; absent sessions are ignored
    #[inline]
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id)?;

        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted session {}", session_id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.session_path_unchecked(session_id))
    }

    fn session_path_unchecked(&self, session_id: &str) -> PathBuf {
        self.history_dir
            .join(format!("{}.{}", session_id, SESSION_EXTENSION))
    }
}

/// Session ids become file names and must stay inside the history directory
fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id != "."
        && !session_id.contains("..")
        && !session_id.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(RagError::Session(format!(
            "Invalid session id: {:?}",
            session_id
        )))
    }
}
