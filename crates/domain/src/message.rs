use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message in the dialogue (provider-agnostic).
///
/// The dialogue is a sequence of turns; each turn owns an ordered list of
/// these. Every use site matches exhaustively — adding a variant is a
/// breaking change on purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Text from the user, optionally with inline images.
    UserText {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageRef>,
    },

    /// Plain assistant prose.
    AssistantText { text: String },

    /// Model reasoning content, kept verbatim for replay.
    Thinking { signature: String, text: String },

    /// The model is invoking a tool.
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },

    /// The outcome of a tool call, attached to the same turn.
    ToolResult {
        id: String,
        output: ToolOutput,
        #[serde(default)]
        is_error: bool,
    },
}

/// Tool output as fed back to the model: either a plain string or a list
/// of content blocks (text and images).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { data: String, media_type: String },
}

/// An inline image attached to a user message. `data` is base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub data: String,
    pub media_type: String,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserText {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::AssistantText { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(id: impl Into<String>, output: ToolOutput, is_error: bool) -> Self {
        Self::ToolResult {
            id: id.into(),
            output,
            is_error,
        }
    }

    /// The plain text carried by this message, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::UserText { text, .. }
            | Self::AssistantText { text }
            | Self::Thinking { text, .. } => Some(text.as_str()),
            Self::ToolCall { .. } => None,
            Self::ToolResult { output, .. } => output.text(),
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }
}

impl ToolOutput {
    /// First text content, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t.as_str()),
            Self::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Join all text content into an owned String.
    ///
    /// Non-text blocks (images) are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}
