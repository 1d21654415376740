//! Inbound WebSocket protocol.
//!
//! One text frame per message; payload is JSON `{type, content}`. Unknown
//! or malformed frames produce an `error` event, never a disconnect.

use serde::Deserialize;
use uuid::Uuid;

/// Messages a client may send over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Completes the handshake; answered with `connection_established`.
    InitAgent {
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        device_id: Option<String>,
    },

    /// Triggers a run on the session.
    UserMessage {
        text: String,
        #[serde(default)]
        attachments: Vec<String>,
    },

    /// Sets the session's cancel token.
    Cancel {},

    /// Resolves a pending tool confirmation.
    ToolConfirmationResponse {
        tool_call_id: String,
        approved: bool,
        #[serde(default)]
        alternative: Option<String>,
    },

    /// Resets the dialogue, keeping the session.
    Clear {},

    /// Forces a truncation pass and reports the savings.
    Compact {},
}

impl ClientMessage {
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
