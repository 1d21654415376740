use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::message::ToolOutput;

/// Runtime representation of a pending tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParameters {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Tool definition exposed to the model and to the dispatcher.
///
/// Names are unique within a registry. `read_only` drives the scheduling
/// rule (parallel vs serial); `requires_confirmation` is advisory — the
/// authoritative gate is [`Tool::should_confirm`] on the concrete input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input.
    pub input_schema: Value,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub requires_confirmation: bool,
}

/// Uniform result shape produced by every tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// What the model sees on the next iteration.
    pub llm_content: ToolOutput,
    /// What observers (console, sockets) display.
    pub user_display_content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            llm_content: ToolOutput::Text(content.clone()),
            user_display_content: content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            llm_content: ToolOutput::Text(message.clone()),
            user_display_content: message,
            is_error: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Confirmation handshake
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Category of the confirmation prompt, used by clients to pick UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationKind {
    Edit,
    Bash,
    Mcp,
}

/// A tool's request for user approval before a specific invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub kind: ConfirmationKind,
    pub message: String,
}

/// The user's answer to a confirmation request. Resolves exactly once.
#[derive(Debug, Clone, Default)]
pub struct ConfirmationDecision {
    pub approved: bool,
    pub alternative: Option<String>,
}

impl ConfirmationDecision {
    pub fn approved() -> Self {
        Self {
            approved: true,
            alternative: None,
        }
    }

    pub fn denied(alternative: Option<String>) -> Self {
        Self {
            approved: false,
            alternative,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The capability every pluggable tool implements.
///
/// Execution failures are ordinary `Err` values: the dispatcher converts
/// them into `ToolResult { is_error: true }` and the batch continues.
/// `cancel` is the session-level token; long-running tools must observe it
/// and return promptly once set.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Whether this invocation needs user approval. `None` means run freely.
    fn should_confirm(&self, _input: &Value) -> Option<ConfirmationRequest> {
        None
    }

    async fn execute(&self, input: Value, cancel: &CancelToken) -> crate::error::Result<ToolResult>;
}
