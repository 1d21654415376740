//! The abstract model capability the core depends on.
//!
//! Concrete providers (HTTP clients, retry logic, token-count heuristics)
//! live outside the core; the controller only sees this trait. Provider
//! responses stay opaque — the only usage surface is [`TokenUsage`].

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::message::Message;
use crate::tool::ToolDescriptor;

/// Token accounting for one model call (or an accumulated run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One request to the model: the dialogue snapshot plus tool surface.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub tools: Vec<ToolDescriptor>,
    pub max_output_tokens: Option<u32>,
    /// Level-triggered session cancel; clients must observe it mid-call.
    pub cancel: CancelToken,
}

/// The model's answer for one step: assistant blocks plus usage.
///
/// Blocks are `Thinking`, `AssistantText`, and `ToolCall` messages in
/// provider order. An empty block list means the model considers the task
/// complete.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub blocks: Vec<Message>,
    pub usage: TokenUsage,
}

/// Abstract model client. Retries are the client's own concern; an `Err`
/// here means retries are exhausted and the turn loop aborts.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> crate::error::Result<ModelTurn>;

    /// Short identifier for logs (provider/model).
    fn name(&self) -> &str {
        "model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage.add(TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        });
        usage.add(TokenUsage {
            input_tokens: 50,
            output_tokens: 5,
        });
        assert_eq!(usage.input_tokens, 150);
        assert_eq!(usage.output_tokens, 25);
        assert_eq!(usage.total(), 175);
    }
}
