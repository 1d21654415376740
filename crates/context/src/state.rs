//! The authoritative dialogue: an ordered list of strictly alternating
//! turns, mutated only by the session's controller.
//!
//! One user input plus the entire agentic episode that answers it forms
//! exactly one assistant turn: appending assistant messages while the last
//! turn is already an assistant turn extends that turn instead of starting
//! a new one. Consecutive user appends merge the same way, so alternation
//! holds structurally for every accepted sequence.

use serde::{Deserialize, Serialize};

use ad_domain::error::{Error, Result};
use ad_domain::message::{ImageRef, Message, ToolOutput};
use ad_domain::tool::ToolCallParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A maximal contiguous run of messages from one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub messages: Vec<Message>,
    /// Set on synthetic turns produced by context compaction.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub summary: bool,
}

impl Turn {
    pub fn user(messages: Vec<Message>) -> Self {
        Self {
            role: Role::User,
            messages,
            summary: false,
        }
    }

    pub fn assistant(messages: Vec<Message>) -> Self {
        Self {
            role: Role::Assistant,
            messages,
            summary: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owns the turn list. Single writer (the controller); everyone else reads
/// through [`ConversationState::snapshot_for_model`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Swap in a compacted turn list (used by truncation).
    pub fn replace_turns(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
    }

    /// Append a user message, starting a new user turn or extending the
    /// current one.
    pub fn append_user_turn(&mut self, text: impl Into<String>, images: Vec<ImageRef>) {
        let msg = Message::UserText {
            text: text.into(),
            images,
        };
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::User => turn.messages.push(msg),
            _ => self.turns.push(Turn::user(vec![msg])),
        }
    }

    /// Append assistant blocks, starting a new assistant turn or extending
    /// the current one. The dialogue must already have a user turn.
    pub fn append_assistant_turn(&mut self, messages: Vec<Message>) -> Result<()> {
        if self.turns.is_empty() {
            return Err(Error::TurnOrder(
                "assistant turn before any user turn".into(),
            ));
        }
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => turn.messages.extend(messages),
            _ => self.turns.push(Turn::assistant(messages)),
        }
        Ok(())
    }

    /// Attach a tool result to its pending call in the current assistant
    /// turn. Fails with `OrphanToolResult` when no matching call is pending.
    pub fn append_tool_result(
        &mut self,
        tool_call_id: &str,
        output: ToolOutput,
        is_error: bool,
    ) -> Result<()> {
        let turn = match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => turn,
            _ => return Err(Error::OrphanToolResult(tool_call_id.to_owned())),
        };

        let has_call = turn.messages.iter().any(
            |m| matches!(m, Message::ToolCall { id, .. } if id == tool_call_id),
        );
        let has_result = turn.messages.iter().any(
            |m| matches!(m, Message::ToolResult { id, .. } if id == tool_call_id),
        );
        if !has_call || has_result {
            return Err(Error::OrphanToolResult(tool_call_id.to_owned()));
        }

        turn.messages
            .push(Message::tool_result(tool_call_id, output, is_error));
        Ok(())
    }

    /// All tool calls in the last assistant turn with no matching result,
    /// in call order.
    pub fn pending_tool_calls(&self) -> Vec<ToolCallParameters> {
        let Some(turn) = self.turns.last() else {
            return Vec::new();
        };
        if turn.role != Role::Assistant {
            return Vec::new();
        }

        let resolved: Vec<&str> = turn
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();

        turn.messages
            .iter()
            .filter_map(|m| match m {
                Message::ToolCall { id, name, input } if !resolved.contains(&id.as_str()) => {
                    Some(ToolCallParameters {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// The most recent assistant prose, scanning backwards.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .filter(|t| t.role == Role::Assistant)
            .flat_map(|t| t.messages.iter().rev())
            .find_map(|m| match m {
                Message::AssistantText { text } => Some(text.clone()),
                _ => None,
            })
    }

    /// Flattened copy of the dialogue, ready to serialize for the model.
    pub fn snapshot_for_model(&self) -> Vec<Message> {
        self.turns
            .iter()
            .flat_map(|t| t.messages.iter().cloned())
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
