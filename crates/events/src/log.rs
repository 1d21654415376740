//! Append-only JSONL event logs.
//!
//! Each session gets an `events/<sessionId>.jsonl` file under the state
//! directory. Every event that reaches the durable subscriber is appended
//! as a single JSON line.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use ad_domain::error::{Error, Result};
use ad_domain::trace::TraceEvent;
use ad_domain::AgentEvent;

/// Writes append-only JSONL event files.
pub struct EventLogWriter {
    base_dir: PathBuf,
}

impl EventLogWriter {
    /// Create a writer rooted at `state_path/events`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let base_dir = state_path.join("events");
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, session_id: &Uuid) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    /// Append one event to a session's log.
    pub fn append(&self, session_id: &Uuid, event: &AgentEvent) -> Result<()> {
        let path = self.path_for(session_id);
        let mut line = serde_json::to_string(event)
            .map_err(|e| Error::Persistence(format!("serializing event line: {e}")))?;
        line.push('\n');

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        file.write_all(line.as_bytes()).map_err(Error::Io)?;

        TraceEvent::EventLogAppend {
            session_id: session_id.to_string(),
            kind: format!("{:?}", event.kind),
        }
        .emit();

        Ok(())
    }

    /// Read back a session's event log. Malformed lines are skipped with a
    /// warning rather than failing the whole read.
    pub fn read(&self, session_id: &Uuid) -> Result<Vec<AgentEvent>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut events = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AgentEvent>(line) {
                Ok(ev) => events.push(ev),
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "skipping malformed event log line"
                    );
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ad_domain::EventKind;

    #[test]
    fn append_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let writer = EventLogWriter::new(dir.path()).unwrap();
        let session = Uuid::new_v4();

        writer
            .append(&session, &AgentEvent::text(EventKind::UserMessage, "hi"))
            .unwrap();
        writer
            .append(&session, &AgentEvent::text(EventKind::AgentResponse, "hello"))
            .unwrap();

        let events = writer.read(&session).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::UserMessage);
        assert_eq!(events[1].content["text"], "hello");
    }

    #[test]
    fn read_missing_session_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let writer = EventLogWriter::new(dir.path()).unwrap();
        assert!(writer.read(&Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let writer = EventLogWriter::new(dir.path()).unwrap();
        let session = Uuid::new_v4();

        writer
            .append(&session, &AgentEvent::text(EventKind::UserMessage, "ok"))
            .unwrap();

        // Corrupt the log with a junk line.
        use std::io::Write;
        let path = dir.path().join("events").join(format!("{session}.jsonl"));
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        writeln!(file, "{{not json").unwrap();

        let events = writer.read(&session).unwrap();
        assert_eq!(events.len(), 1);
    }
}
