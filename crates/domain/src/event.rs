use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event taxonomy carried by the per-session stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentThinking,
    AgentResponse,
    ToolCall,
    ToolConfirmation,
    ToolResult,
    AgentResponseInterrupted,
    Error,
    Processing,
    ConnectionEstablished,
    UserMessage,
    SystemMessage,
    CompactDone,
    /// Emitted to healthy subscribers when a slow subscriber dropped an event.
    SubscriberLag,
}

/// One entry in the observable stream.
///
/// `content` is a free-form JSON object; the shape per kind is fixed by the
/// emitter (see the controller and dispatcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

impl AgentEvent {
    pub fn new(kind: EventKind, content: Value) -> Self {
        Self {
            kind,
            content,
            timestamp: Utc::now(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Shorthand for the common `{"text": ...}` payload.
    pub fn text(kind: EventKind, text: impl Into<String>) -> Self {
        Self::new(kind, serde_json::json!({ "text": text.into() }))
    }

    /// Shorthand for an error event with a `{"message": ...}` payload.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            EventKind::Error,
            serde_json::json!({ "message": message.into() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::AgentResponseInterrupted).unwrap();
        assert_eq!(json, "\"agent_response_interrupted\"");
    }

    #[test]
    fn event_wire_shape() {
        let ev = AgentEvent::text(EventKind::AgentResponse, "hello").with_session(Uuid::new_v4());
        let v: Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "agent_response");
        assert_eq!(v["content"]["text"], "hello");
        assert!(v["timestamp"].is_string());
        assert!(v["session_id"].is_string());
    }

    #[test]
    fn session_id_omitted_when_absent() {
        let v: Value = serde_json::to_value(AgentEvent::error("boom")).unwrap();
        assert!(v.get("session_id").is_none());
    }
}
