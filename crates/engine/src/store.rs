//! Persistent session store
//!
//! One JSON file per shop domain holding the full conversation snapshot.
//! Writes are best-effort: a full disk or read-only home directory degrades
//! the widget to in-memory sessions instead of breaking chat.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use yuume_protocol::{new_id, CustomerProfile, Message, SessionStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything the widget needs to resume a conversation after a reload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub profile: Option<CustomerProfile>,
}

impl PersistedSession {
    /// A brand-new session with an empty log
    pub fn fresh(now: DateTime<Utc>) -> Self {
        PersistedSession {
            session_id: new_id(),
            status: SessionStatus::Active,
            messages: Vec::new(),
            last_activity: now,
            profile: None,
        }
    }

    /// Stamp user activity so the inactivity window restarts
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}

/// File-backed store for one shop domain
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    timeout: chrono::Duration,
}

impl SessionStore {
    pub fn open(root: &Path, shop_domain: &str, timeout: chrono::Duration) -> Self {
        let dir = root.join(sanitize_domain(shop_domain));
        SessionStore {
            path: dir.join("session.json"),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored session, replacing it with a fresh one when the file
    /// is missing, unreadable, or past the inactivity window. Never fails.
    pub fn load(&self) -> PersistedSession {
        let now = Utc::now();
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return PersistedSession::fresh(now),
        };

        match serde_json::from_str::<PersistedSession>(&raw) {
            Ok(saved) if now.signed_duration_since(saved.last_activity) < self.timeout => saved,
            Ok(saved) => {
                info!(
                    component = "store",
                    event = "store.session_expired",
                    session_id = %saved.session_id,
                    "Stored session expired; starting fresh"
                );
                PersistedSession::fresh(now)
            }
            Err(err) => {
                warn!(
                    component = "store",
                    event = "store.corrupt",
                    path = %self.path.display(),
                    error = %err,
                    "Could not parse stored session; starting fresh"
                );
                PersistedSession::fresh(now)
            }
        }
    }

    /// Write the full snapshot. Failures are logged and swallowed.
    pub fn persist(&self, session: &PersistedSession) {
        if let Err(err) = self.try_persist(session) {
            warn!(
                component = "store",
                event = "store.persist_failed",
                path = %self.path.display(),
                error = %err,
                "Failed to persist session; continuing in memory"
            );
        }
    }

    fn try_persist(&self, session: &PersistedSession) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write to a temp file and rename so a crash mid-write never leaves
        // a half-parsed session behind.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(session)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Drop the stored session entirely
    pub fn clear(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    component = "store",
                    event = "store.clear_failed",
                    path = %self.path.display(),
                    error = %err,
                    "Failed to remove stored session"
                );
            }
        }
    }
}

/// Shop domains become directory names; anything that could escape the data
/// root is replaced.
fn sanitize_domain(domain: &str) -> String {
    let cleaned: String = domain
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|ch| ch == '.') {
        "default".to_string()
    } else {
        cleaned
    }
}
