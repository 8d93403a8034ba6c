//! Session persistence.
//!
//! The only state the client keeps across runs: a session token and the
//! username it was issued for. Whether a token is still good is decided by a
//! [`TokenValidator`]; the core only refuses to auto-connect when it is not.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    pub username: String,
    pub saved_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
            saved_at: Utc::now(),
        }
    }
}

/// Persists a single session.
pub trait SessionStore {
    fn load(&self) -> anyhow::Result<Option<StoredSession>>;
    fn save(&mut self, session: &StoredSession) -> anyhow::Result<()>;
    fn clear(&mut self) -> anyhow::Result<()>;
}

/// Decides whether a stored session may be used to reconnect.
pub trait TokenValidator {
    fn validate(&self, session: &StoredSession) -> bool;
}

/// Session kept as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for JsonFileStore {
    fn load(&self) -> anyhow::Result<Option<StoredSession>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read session {}", self.path.display()))?;
        let session = serde_json::from_str(&text)
            .with_context(|| format!("parse session {}", self.path.display()))?;
        Ok(Some(session))
    }

    fn save(&mut self, session: &StoredSession) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(session).context("serialize session")?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("write session {}", self.path.display()))?;
        debug!(path = %self.path.display(), user = %session.username, "Session saved");
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove session {}", self.path.display())),
        }
    }
}

/// Accepts non-empty tokens for a named user that are younger than `max_age`.
#[derive(Debug, Clone, Copy)]
pub struct MaxAgeValidator {
    pub max_age: Duration,
}

impl MaxAgeValidator {
    pub fn hours(hours: i64) -> Self {
        Self {
            max_age: Duration::hours(hours),
        }
    }
}

impl TokenValidator for MaxAgeValidator {
    fn validate(&self, session: &StoredSession) -> bool {
        !session.token.trim().is_empty()
            && !session.username.trim().is_empty()
            && Utc::now().signed_duration_since(session.saved_at) <= self.max_age
    }
}
