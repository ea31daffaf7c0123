//! Persistent conversation sessions
//!
//! Each session is one pretty-printed JSON file, `<dir>/<id>.json`:
//!
//! ```text
//! {
//!   "session_id": "20250101_093000",
//!   "history": [ {"role": "user", "content": "..."}, ... ],
//!   "last_saved": "2025-01-01T09:30:12.123Z"
//! }
//! ```
//!
//! `last_saved` is written as RFC 3339 UTC. Files from tools that write a local
//! ISO 8601 time without an offset load too.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::conversation::{ConversationMessage, Role};

/// Format of generated session ids
pub const SESSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session with ID '{0}' already exists.")]
    AlreadyExists(String),
    #[error("Session '{0}' not found.")]
    NotFound(String),
    #[error("Invalid session id '{0}'")]
    InvalidId(String),
    #[error("Session I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Corrupt session file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A saved conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
    /// Set on every save. Offset-less timestamps are read as local time;
    /// a missing one reads as the epoch.
    #[serde(default, deserialize_with = "deserialize_last_saved")]
    pub last_saved: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            history: Vec::new(),
            last_saved: Utc::now(),
        }
    }

    /// Append a message to the history
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(ConversationMessage::new(role, content));
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut Vec<ConversationMessage> {
        &mut self.history
    }
}

/// Session storage manager
pub struct SessionStore {
    /// Base directory for session files
    base_dir: PathBuf,
}

impl SessionStore {
    /// Open a store, creating the directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|source| SessionError::Io {
            path: base_dir.clone(),
            source,
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create and persist an empty session
    ///
    /// Without an id, one is generated from the local time (`%Y%m%d_%H%M%S`).
    pub fn create(&self, session_id: Option<&str>) -> Result<Session, SessionError> {
        let id = match session_id {
            Some(id) => id.trim().to_string(),
            None => Local::now().format(SESSION_ID_FORMAT).to_string(),
        };
        let path = self.session_path(&id)?;
        if path.exists() {
            return Err(SessionError::AlreadyExists(id));
        }

        let mut session = Session::new(id);
        self.save(&mut session)?;
        info!(session_id = %session.session_id, "Created session");
        Ok(session)
    }

    /// Save a session to disk, updating `last_saved`
    pub fn save(&self, session: &mut Session) -> Result<(), SessionError> {
        let path = self.session_path(&session.session_id)?;
        session.last_saved = Utc::now();
        let json = serde_json::to_string_pretty(session).map_err(|source| SessionError::Corrupt {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| SessionError::Io { path, source })?;
        debug!(session_id = %session.session_id, messages = session.history.len(), "Session saved");
        Ok(())
    }

    /// Load a session from disk
    pub fn load(&self, session_id: &str) -> Result<Session, SessionError> {
        let path = self.session_path(session_id)?;
        if !path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        load_from_path(&path)
    }

    /// Ids of all stored sessions, sorted
    pub fn list(&self) -> Result<Vec<String>, SessionError> {
        let entries = std::fs::read_dir(&self.base_dir).map_err(|source| SessionError::Io {
            path: self.base_dir.clone(),
            source,
        })?;

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "json").unwrap_or(false))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// The session saved most recently, if any can be read
    pub fn most_recent(&self) -> Result<Option<Session>, SessionError> {
        let latest = self
            .list()?
            .iter()
            .filter_map(|id| match self.load(id) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Skipping unreadable session");
                    None
                }
            })
            .max_by_key(|s| s.last_saved);
        Ok(latest)
    }

    /// Delete a session
    pub fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let path = self.session_path(session_id)?;
        if !path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        std::fs::remove_file(&path).map_err(|source| SessionError::Io { path, source })
    }

    /// Get the file path for a session; ids may not escape the store directory
    fn session_path(&self, session_id: &str) -> Result<PathBuf, SessionError> {
        let valid = !session_id.is_empty()
            && session_id != "."
            && session_id != ".."
            && !session_id.contains(['/', '\\']);
        if !valid {
            return Err(SessionError::InvalidId(session_id.to_string()));
        }
        Ok(self.base_dir.join(format!("{}.json", session_id)))
    }
}

fn load_from_path(path: &Path) -> Result<Session, SessionError> {
    let json = std::fs::read_to_string(path).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&json).map_err(|source| SessionError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn deserialize_last_saved<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid last_saved timestamp '{}'", raw)))
}

/// RFC 3339, or an ISO 8601 local time without offset
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}
