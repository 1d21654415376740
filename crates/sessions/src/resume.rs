//! The "latest session" resume pointer.
//!
//! `current_state.json` at the top of the state directory names the most
//! recently active session so `chat --resume` and one-shot runs can pick
//! up where the user left off.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ad_domain::error::{Error, Result};

use crate::fsutil::atomic_write_json;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePointer {
    pub current_session_id: Uuid,
    pub workspace_path: PathBuf,
    pub last_updated: DateTime<Utc>,
}

impl ResumePointer {
    fn path(state_path: &Path) -> PathBuf {
        state_path.join("current_state.json")
    }

    /// Record `session_id` as the latest session.
    pub fn write(state_path: &Path, session_id: Uuid, workspace_path: &Path) -> Result<()> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let pointer = Self {
            current_session_id: session_id,
            workspace_path: workspace_path.to_path_buf(),
            last_updated: Utc::now(),
        };
        atomic_write_json(&Self::path(state_path), &pointer)
    }

    /// The latest session, if any was recorded. A malformed pointer is
    /// treated as absent (resume is best-effort).
    pub fn read(state_path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(Self::path(state_path)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(pointer) => Some(pointer),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed current_state.json");
                None
            }
        }
    }
}
