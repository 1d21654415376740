//! Gateway-owned session store.
//!
//! Persists session records in `sessions.json` under the configured state
//! path. Each record tracks the session's workspace directory, timestamps,
//! and lifecycle status. Deletion is soft: the record stays with status
//! `deleted` so event logs and state files remain attributable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ad_domain::error::{Error, Result};
use ad_domain::trace::TraceEvent;

use crate::fsutil::atomic_write_json;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Deleted,
}

/// A single session tracked by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub workspace_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    pub status: SessionStatus,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session store backed by a JSON file, with per-session workspace
/// directories created on first resolve.
pub struct SessionStore {
    sessions_path: PathBuf,
    workspace_root: PathBuf,
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions/sessions.json`.
    pub fn new(state_path: &Path, workspace_root: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        std::fs::create_dir_all(workspace_root).map_err(Error::Io)?;

        let sessions_path = dir.join("sessions.json");
        let sessions = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            workspace_root: workspace_root.to_path_buf(),
            sessions: RwLock::new(sessions),
        })
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionRecord> {
        self.sessions.read().get(id).cloned()
    }

    /// Resolve or create a session. Creates the workspace directory if it
    /// is absent. Returns `(record, is_new)`.
    pub fn resolve_or_create(
        &self,
        id: Uuid,
        device_id: Option<String>,
    ) -> Result<(SessionRecord, bool)> {
        // Fast path: session already exists.
        {
            let sessions = self.sessions.read();
            if let Some(record) = sessions.get(&id) {
                std::fs::create_dir_all(&record.workspace_dir).map_err(Error::Io)?;
                return Ok((record.clone(), false));
            }
        }

        let now = Utc::now();
        let workspace_dir = self.workspace_root.join(id.to_string());
        std::fs::create_dir_all(&workspace_dir).map_err(Error::Io)?;

        let record = SessionRecord {
            id,
            workspace_dir,
            created_at: now,
            updated_at: now,
            last_message_at: None,
            name: None,
            device_id,
            status: SessionStatus::Active,
        };

        self.sessions.write().insert(id, record.clone());

        TraceEvent::SessionResolved {
            session_id: id.to_string(),
            is_new: true,
        }
        .emit();

        Ok((record, true))
    }

    /// Mark a completed turn: bumps `last_message_at` and `updated_at`.
    pub fn touch_message(&self, id: &Uuid) {
        let mut sessions = self.sessions.write();
        if let Some(record) = sessions.get_mut(id) {
            let now = Utc::now();
            record.last_message_at = Some(now);
            record.updated_at = now;
        }
    }

    pub fn rename(&self, id: &Uuid, name: Option<String>) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(record) => {
                record.name = name;
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn set_status(&self, id: &Uuid, status: SessionStatus) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Soft-delete: the record stays, marked `deleted`.
    pub fn mark_deleted(&self, id: &Uuid) -> bool {
        self.set_status(id, SessionStatus::Deleted)
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self.sessions.read().values().cloned().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records
    }

    /// Persist the current records to disk (atomic).
    pub fn flush(&self) -> Result<()> {
        let sessions = self.sessions.read();
        atomic_write_json(&self.sessions_path, &*sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::new(&dir.path().join("state"), &dir.path().join("ws")).unwrap()
    }

    #[test]
    fn resolve_creates_workspace_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let id = Uuid::new_v4();
        let (record, is_new) = store
            .resolve_or_create(id, Some("device-1".into()))
            .unwrap();
        assert!(is_new);
        assert!(record.workspace_dir.is_dir());
        assert_eq!(record.status, SessionStatus::Active);

        let (again, is_new) = store.resolve_or_create(id, None).unwrap();
        assert!(!is_new);
        assert_eq!(again.device_id.as_deref(), Some("device-1"));
    }

    #[test]
    fn touch_message_updates_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let id = Uuid::new_v4();
        store.resolve_or_create(id, None).unwrap();

        assert!(store.get(&id).unwrap().last_message_at.is_none());
        store.touch_message(&id);
        assert!(store.get(&id).unwrap().last_message_at.is_some());
    }

    #[test]
    fn soft_delete_keeps_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let id = Uuid::new_v4();
        store.resolve_or_create(id, None).unwrap();

        assert!(store.mark_deleted(&id));
        let record = store.get(&id).unwrap();
        assert_eq!(record.status, SessionStatus::Deleted);
    }

    #[test]
    fn flush_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        {
            let store = store(&dir);
            store.resolve_or_create(id, None).unwrap();
            store.rename(&id, Some("my session".into()));
            store.flush().unwrap();
        }

        let store = store(&dir);
        let record = store.get(&id).unwrap();
        assert_eq!(record.name.as_deref(), Some("my session"));
    }

    #[test]
    fn list_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.resolve_or_create(a, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.resolve_or_create(b, None).unwrap();

        let list = store.list();
        assert_eq!(list[0].id, b);
        assert_eq!(list[1].id, a);
    }
}
