//! Durable state persistence.
//!
//! Each session owns a directory under `<state>/sessions/<sessionId>/`
//! holding `state.json` (the turn list) and `metadata.json`. Writes go to
//! a `*.json.tmp` sibling, fsync, then rename, so a crash never leaves a
//! half-written file. An absent state loads as an empty dialogue.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use ad_domain::error::{Error, Result};
use ad_domain::model::TokenUsage;
use ad_domain::trace::TraceEvent;

use crate::state::ConversationState;

pub const METADATA_VERSION: &str = "2.0";

/// Side-car metadata written next to the turn list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMetadata {
    pub version: String,
    pub session_id: Uuid,
    pub workspace_dir: PathBuf,
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub settings: Value,
}

impl StateMetadata {
    pub fn new(session_id: Uuid, workspace_dir: PathBuf) -> Self {
        Self {
            version: METADATA_VERSION.to_owned(),
            session_id,
            workspace_dir,
            last_message_at: None,
            token_usage: TokenUsage::default(),
            settings: Value::Null,
        }
    }
}

/// Atomic JSON write: `path.tmp` → fsync → rename.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Persistence(format!("serializing {}: {e}", path.display())))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp).map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.sync_all().map_err(Error::Io)?;
    }
    std::fs::rename(&tmp, path).map_err(Error::Io)?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StateStore {
    base_dir: PathBuf,
}

impl StateStore {
    /// Root the store at `state_path/sessions`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let base_dir = state_path.join("sessions");
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;
        Ok(Self { base_dir })
    }

    pub fn session_dir(&self, session_id: &Uuid) -> PathBuf {
        self.base_dir.join(session_id.to_string())
    }

    /// Persist the full turn list plus metadata, atomically per file.
    pub fn save(
        &self,
        session_id: &Uuid,
        state: &ConversationState,
        metadata: &StateMetadata,
    ) -> Result<()> {
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        atomic_write_json(&dir.join("state.json"), state)?;
        atomic_write_json(&dir.join("metadata.json"), metadata)?;

        TraceEvent::StateSaved {
            session_id: session_id.to_string(),
            turns: state.turns().len(),
        }
        .emit();

        Ok(())
    }

    /// Load a session's dialogue. Absent files yield an empty state;
    /// corrupt files are a `Persistence` error for the caller to decide on.
    pub fn load(&self, session_id: &Uuid) -> Result<(ConversationState, Option<StateMetadata>)> {
        let dir = self.session_dir(session_id);
        let state_path = dir.join("state.json");
        if !state_path.exists() {
            return Ok((ConversationState::new(), None));
        }

        let raw = std::fs::read_to_string(&state_path).map_err(Error::Io)?;
        let state: ConversationState = serde_json::from_str(&raw)
            .map_err(|e| Error::Persistence(format!("parsing state.json: {e}")))?;

        let metadata_path = dir.join("metadata.json");
        let metadata = if metadata_path.exists() {
            let raw = std::fs::read_to_string(&metadata_path).map_err(Error::Io)?;
            Some(
                serde_json::from_str::<StateMetadata>(&raw)
                    .map_err(|e| Error::Persistence(format!("parsing metadata.json: {e}")))?,
            )
        } else {
            None
        };

        TraceEvent::StateLoaded {
            session_id: session_id.to_string(),
            turns: state.turns().len(),
        }
        .emit();

        Ok((state, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ad_domain::message::{ImageRef, Message};

    #[test]
    fn absent_state_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        let (state, meta) = store.load(&Uuid::new_v4()).unwrap();
        assert!(state.is_empty());
        assert!(meta.is_none());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        let session = Uuid::new_v4();

        let mut state = ConversationState::new();
        state.append_user_turn(
            "look at this",
            vec![ImageRef {
                data: "aGVsbG8=".into(),
                media_type: "image/png".into(),
            }],
        );
        state
            .append_assistant_turn(vec![Message::assistant("nice image")])
            .unwrap();

        let mut meta = StateMetadata::new(session, dir.path().join("ws"));
        meta.last_message_at = Some(Utc::now());

        store.save(&session, &state, &meta).unwrap();
        let (loaded, loaded_meta) = store.load(&session).unwrap();

        assert_eq!(loaded.turns(), state.turns());
        let loaded_meta = loaded_meta.unwrap();
        assert_eq!(loaded_meta.version, METADATA_VERSION);
        assert_eq!(loaded_meta.session_id, session);
    }

    #[test]
    fn corrupt_state_surfaces_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        let session = Uuid::new_v4();

        let session_dir = store.session_dir(&session);
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(session_dir.join("state.json"), "{broken").unwrap();

        let err = store.load(&session).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        let session = Uuid::new_v4();

        let state = ConversationState::new();
        let meta = StateMetadata::new(session, dir.path().to_path_buf());
        store.save(&session, &state, &meta).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(store.session_dir(&session))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
