//! Context compaction — keeps the dialogue inside the model's input-token
//! budget by summarizing old assistant work.
//!
//! Protection rules: the first user turn and the most recent user turn
//! (plus everything after it) are never touched. Between those, assistant
//! turns are summarized oldest-first into synthetic summary turns; if the
//! budget is still exceeded, the oldest summary turns are dropped. A turn
//! is always compacted whole, so a `ToolCall` and its `ToolResult` either
//! both survive or both go.

use std::sync::Arc;

use ad_domain::config::{ContextConfig, TruncationStrategy};
use ad_domain::error::Result;
use ad_domain::message::Message;
use ad_domain::model::{ModelClient, ModelRequest};
use ad_domain::trace::TraceEvent;
use ad_domain::CancelToken;

use crate::state::{Role, Turn};
use crate::tokens::TokenCounter;

/// Stand-in text when no summarizer model is available.
const ELISION_MARKER: &str = "[Earlier assistant work elided to fit the context budget]";

pub struct ContextManager {
    counter: Arc<dyn TokenCounter>,
    summarizer: Option<Arc<dyn ModelClient>>,
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(counter: Arc<dyn TokenCounter>, config: ContextConfig) -> Self {
        Self {
            counter,
            summarizer: None,
            config,
        }
    }

    pub fn with_summarizer(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.summarizer = Some(client);
        self
    }

    pub fn budget(&self) -> usize {
        self.config.token_budget
    }

    pub fn count_messages(&self, messages: &[Message]) -> usize {
        self.counter.count_messages(messages)
    }

    pub fn count_turns(&self, turns: &[Turn]) -> usize {
        let flat: Vec<Message> = turns.iter().flat_map(|t| t.messages.clone()).collect();
        self.counter.count_messages(&flat)
    }

    /// Compact only when the budget is exceeded. Returns `None` when the
    /// input already fits (the caller keeps its list untouched).
    pub async fn truncate_if_needed(&self, turns: &[Turn]) -> Result<Option<Vec<Turn>>> {
        if self.count_turns(turns) <= self.config.token_budget {
            return Ok(None);
        }
        Ok(Some(self.compact(turns, false).await?))
    }

    /// Unconditional compaction: summarize every eligible assistant turn,
    /// then drop old summaries if the budget is still exceeded.
    pub async fn truncate(&self, turns: &[Turn]) -> Result<Vec<Turn>> {
        self.compact(turns, true).await
    }

    async fn compact(&self, turns: &[Turn], exhaustive: bool) -> Result<Vec<Turn>> {
        let original_tokens = self.count_turns(turns);
        let mut result: Vec<Turn> = turns.to_vec();

        let Some((first_user, last_user)) = protected_bounds(&result) else {
            return Ok(result);
        };

        // ── Phase 1: summarize middle assistant turns, oldest first ──
        let mut turns_summarized = 0usize;
        for i in (first_user + 1)..last_user {
            if !exhaustive && self.count_turns(&result) <= self.config.token_budget {
                break;
            }
            let turn = &result[i];
            if turn.role != Role::Assistant || turn.summary {
                continue;
            }
            let summary_text = self.summarize_turn(turn).await;
            result[i] = Turn {
                role: Role::Assistant,
                messages: vec![Message::assistant(summary_text)],
                summary: true,
            };
            turns_summarized += 1;
        }

        // ── Phase 2: drop oldest summaries while still over budget ──
        let mut turns_dropped = 0usize;
        while self.count_turns(&result) > self.config.token_budget {
            let Some((first_user, last_user)) = protected_bounds(&result) else {
                break;
            };
            let droppable = ((first_user + 1)..last_user)
                .find(|&i| result[i].role == Role::Assistant && result[i].summary);
            match droppable {
                Some(i) => {
                    result.remove(i);
                    turns_dropped += 1;
                }
                None => break,
            }
        }

        // Dropping an assistant turn can leave two user turns adjacent;
        // restore strict alternation before handing the list back.
        merge_adjacent_same_role(&mut result);

        let new_tokens = self.count_turns(&result);
        if turns_summarized > 0 || turns_dropped > 0 {
            TraceEvent::ContextTruncated {
                original_tokens,
                new_tokens,
                turns_summarized,
                turns_dropped,
            }
            .emit();
        }

        Ok(result)
    }

    /// Produce the replacement text for one assistant turn.
    async fn summarize_turn(&self, turn: &Turn) -> String {
        if self.config.strategy != TruncationStrategy::Summarize {
            return ELISION_MARKER.to_owned();
        }
        let Some(client) = self.summarizer.as_ref() else {
            return ELISION_MARKER.to_owned();
        };
        let conversation = build_conversation_text(turn);
        let prompt = format!(
            "Summarize the following excerpt of an agent's work into a concise \
             summary that preserves:\n\
             1. What was attempted and which tools were used\n\
             2. Key results and facts learned\n\
             3. Decisions made and open threads\n\n\
             Be concise but preserve all actionable context. Write in present \
             tense. Omit pleasantries.\n\n\
             EXCERPT:\n{conversation}"
        );

        let request = ModelRequest {
            messages: vec![Message::user(prompt)],
            system_prompt: "You are a conversation summarizer.".into(),
            tools: Vec::new(),
            max_output_tokens: Some(self.config.summary_max_tokens),
            cancel: CancelToken::new(),
        };

        match client.generate(request).await {
            Ok(turn) => {
                let text = turn
                    .blocks
                    .iter()
                    .find_map(|b| match b {
                        Message::AssistantText { text } => Some(text.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                if text.is_empty() {
                    ELISION_MARKER.to_owned()
                } else {
                    format!("[Summary of earlier work]\n{text}")
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "summarizer failed; eliding turn instead");
                ELISION_MARKER.to_owned()
            }
        }
    }
}

/// Indices of the first and most recent user turn. `None` when the dialogue
/// has fewer than two user turns — nothing is compactable then.
fn protected_bounds(turns: &[Turn]) -> Option<(usize, usize)> {
    let first_user = turns.iter().position(|t| t.role == Role::User)?;
    let last_user = turns.iter().rposition(|t| t.role == Role::User)?;
    (last_user > first_user).then_some((first_user, last_user))
}

fn merge_adjacent_same_role(turns: &mut Vec<Turn>) {
    let mut i = 1;
    while i < turns.len() {
        if turns[i].role == turns[i - 1].role {
            let turn = turns.remove(i);
            turns[i - 1].messages.extend(turn.messages);
            turns[i - 1].summary &= turn.summary;
        } else {
            i += 1;
        }
    }
}

/// Flatten one turn into labeled text for the summary prompt. Long tool
/// results are clamped to keep the prompt itself manageable.
fn build_conversation_text(turn: &Turn) -> String {
    let mut buf = String::new();
    for msg in &turn.messages {
        match msg {
            Message::AssistantText { text } | Message::Thinking { text, .. } => {
                buf.push_str("Assistant: ");
                buf.push_str(text);
            }
            Message::ToolCall { name, input, .. } => {
                buf.push_str("Tool call: ");
                buf.push_str(name);
                buf.push(' ');
                buf.push_str(&serde_json::to_string(input).unwrap_or_default());
            }
            Message::ToolResult { output, .. } => {
                buf.push_str("Tool result: ");
                let text = output.extract_all_text();
                if text.len() > 2000 {
                    let head = char_boundary_at_or_below(&text, 1000);
                    let tail = char_boundary_at_or_above(&text, text.len() - 500);
                    buf.push_str(&text[..head]);
                    buf.push_str(" [...] ");
                    buf.push_str(&text[tail..]);
                } else {
                    buf.push_str(&text);
                }
            }
            Message::UserText { text, .. } => {
                buf.push_str("User: ");
                buf.push_str(text);
            }
        }
        buf.push('\n');
    }
    buf
}

fn char_boundary_at_or_below(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn char_boundary_at_or_above(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
