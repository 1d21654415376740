//! The per-session turn loop.
//!
//! `run` drives one user input to a terminal state: truncate context, call
//! the model, commit the assistant blocks, dispatch pending tool calls,
//! feed results back, repeat until the model stops calling tools, the turn
//! budget runs out, or the session is cancelled. The assistant turn is
//! committed to state *before* tool execution so the transcript stays
//! faithful even on a crash.

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use parking_lot::Mutex;
use serde::Serialize;

use ad_context::{ContextManager, ConversationState, Turn};
use ad_domain::config::AgentConfig;
use ad_domain::error::Result;
use ad_domain::message::{ImageRef, Message};
use ad_domain::model::{ModelClient, ModelRequest, TokenUsage};
use ad_domain::trace::TraceEvent;
use ad_domain::{AgentEvent, CancelToken, EventKind};
use ad_events::EventStream;
use ad_tools::{ToolDispatcher, TOOL_INTERRUPT_MESSAGE};

pub const AGENT_INTERRUPT_MESSAGE: &str = "Agent interrupted by user.";
const AGENT_INTERRUPT_FAKE_MODEL_RSP: &str =
    "Agent interrupted by user. You can resume by providing a new instruction.";
const COMPLETE_MESSAGE: &str = "Task complete";
const TASK_COMPLETED_MESSAGE: &str = "Task completed";
const MAX_TURNS_MESSAGE: &str = "Agent did not complete after max turns";

const DEFAULT_SYSTEM_PROMPT: &str = "You are AgentDock, an autonomous agent. Work step by step, \
     use the available tools when they help, and stop when the task is done.";

/// Extensions inlined as image blocks when attached to a run.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal result of one `run` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutput {
    /// The last assistant text (or the canonical terminal message).
    pub output: String,
    /// Short status: completed / interrupted / budget exceeded.
    pub message: String,
}

/// Result of a manual `compact` invocation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CompactReport {
    pub original_tokens: usize,
    pub new_tokens: usize,
    pub tokens_saved: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drives a single session's model↔tool loop.
///
/// State is mutated only here; locks are short and never held across an
/// await. `cancel` is level-triggered and cleared at the start of each run.
pub struct AgentController {
    model: Arc<dyn ModelClient>,
    dispatcher: Arc<ToolDispatcher>,
    context: Arc<ContextManager>,
    events: EventStream,
    state: Mutex<ConversationState>,
    cancel: CancelToken,
    usage: Mutex<TokenUsage>,
    workspace_root: PathBuf,
    system_prompt: String,
    max_turns: usize,
    max_output_tokens: Option<u32>,
    session_label: Option<String>,
}

impl AgentController {
    pub fn new(
        model: Arc<dyn ModelClient>,
        dispatcher: Arc<ToolDispatcher>,
        context: Arc<ContextManager>,
        events: EventStream,
        workspace_root: PathBuf,
        config: &AgentConfig,
    ) -> Self {
        Self {
            model,
            dispatcher,
            context,
            events,
            state: Mutex::new(ConversationState::new()),
            cancel: CancelToken::new(),
            usage: Mutex::new(TokenUsage::default()),
            workspace_root,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned()),
            max_turns: config.max_turns,
            max_output_tokens: config.max_output_tokens,
            session_label: None,
        }
    }

    /// Attach a session id used in trace output.
    pub fn with_session_label(mut self, label: impl Into<String>) -> Self {
        self.session_label = Some(label.into());
        self
    }

    /// Request cancellation of the running turn loop. Idempotent; observed
    /// by the model call, the confirmation gate, and in-flight tools.
    pub fn cancel(&self) {
        self.cancel.cancel();
        tracing::debug!("agent cancellation requested");
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Reset the dialogue, keeping the session identity and workspace.
    pub fn clear(&self) {
        self.state.lock().clear();
        self.cancel.reset();
    }

    /// Copy of the current dialogue, for persistence and inspection.
    pub fn state_snapshot(&self) -> ConversationState {
        self.state.lock().clone()
    }

    /// Replace the dialogue wholesale (session resume).
    pub fn restore_state(&self, state: ConversationState) {
        *self.state.lock() = state;
    }

    /// Accumulated token usage across runs.
    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock()
    }

    /// Force a truncation pass and report the token delta.
    pub async fn compact(&self) -> Result<CompactReport> {
        let turns: Vec<Turn> = self.state.lock().turns().to_vec();
        let original_tokens = self.context.count_turns(&turns);

        let compacted = self.context.truncate(&turns).await?;
        let new_tokens = self.context.count_turns(&compacted);
        self.state.lock().replace_turns(compacted);

        let report = CompactReport {
            original_tokens,
            new_tokens,
            tokens_saved: original_tokens.saturating_sub(new_tokens),
        };
        self.events
            .publish(AgentEvent::new(
                EventKind::CompactDone,
                serde_json::json!({
                    "original_tokens": report.original_tokens,
                    "new_tokens": report.new_tokens,
                    "tokens_saved": report.tokens_saved,
                }),
            ))
            .await;
        Ok(report)
    }

    // ──────────────────────────────────────────────────────────────
    // The turn loop
    // ──────────────────────────────────────────────────────────────

    /// Run the loop for one user input and return the terminal output.
    pub async fn run(&self, instruction: &str, attachments: &[String]) -> Result<AgentOutput> {
        self.cancel.reset();

        let (text, images) = self.prepare_instruction(instruction, attachments);
        self.state.lock().append_user_turn(text, images);

        let mut iterations = 0usize;
        let mut remaining = self.max_turns;
        while remaining > 0 {
            remaining -= 1;
            iterations += 1;

            self.truncate_history().await?;

            if self.cancel.is_cancelled() {
                return self
                    .finish_interrupted(AGENT_INTERRUPT_FAKE_MODEL_RSP, AGENT_INTERRUPT_MESSAGE)
                    .await;
            }

            self.events
                .publish(AgentEvent::new(
                    EventKind::AgentThinking,
                    serde_json::json!({}),
                ))
                .await;

            let request = ModelRequest {
                messages: self.state.lock().snapshot_for_model(),
                system_prompt: self.system_prompt.clone(),
                tools: self.dispatcher.descriptors(),
                max_output_tokens: self.max_output_tokens,
                cancel: self.cancel.clone(),
            };

            let model_turn = match self.model.generate(request).await {
                Ok(turn) => turn,
                Err(e) => {
                    self.events.publish(AgentEvent::error(e.to_string())).await;
                    return Err(e);
                }
            };
            self.usage.lock().add(model_turn.usage);

            // An empty response is a completion signal, not an error.
            let blocks = if model_turn.blocks.is_empty() {
                vec![Message::assistant(COMPLETE_MESSAGE)]
            } else {
                model_turn.blocks
            };
            self.state.lock().append_assistant_turn(blocks.clone())?;

            let mut had_text = false;
            for block in &blocks {
                if let Message::AssistantText { text } = block {
                    had_text = true;
                    self.events
                        .publish(AgentEvent::text(EventKind::AgentResponse, text.clone()))
                        .await;
                }
            }

            let pending = self.state.lock().pending_tool_calls();
            if pending.is_empty() {
                if !had_text {
                    self.events
                        .publish(AgentEvent::text(
                            EventKind::AgentResponse,
                            TASK_COMPLETED_MESSAGE,
                        ))
                        .await;
                }
                let output = self
                    .state
                    .lock()
                    .last_assistant_text()
                    .unwrap_or_else(|| TASK_COMPLETED_MESSAGE.to_owned());
                self.emit_turn_completed(iterations);
                return Ok(AgentOutput {
                    output,
                    message: TASK_COMPLETED_MESSAGE.to_owned(),
                });
            }

            if self.cancel.is_cancelled() {
                // Close out every pending call with the literal interrupt
                // result so the transcript stays consistent.
                {
                    let mut state = self.state.lock();
                    for call in &pending {
                        if let Err(e) =
                            state.append_tool_result(&call.id, TOOL_INTERRUPT_MESSAGE.into(), false)
                        {
                            tracing::warn!(call_id = %call.id, error = %e, "skipping interrupt result");
                        }
                    }
                }
                return self
                    .finish_interrupted(TOOL_INTERRUPT_MESSAGE, TOOL_INTERRUPT_MESSAGE)
                    .await;
            }

            tracing::debug!(count = pending.len(), "dispatching tool batch");
            let results = self.dispatcher.run_batch(&pending, &self.cancel).await;

            let mut state = self.state.lock();
            for (call, result) in pending.iter().zip(results) {
                if let Err(e) =
                    state.append_tool_result(&call.id, result.llm_content, result.is_error)
                {
                    tracing::warn!(call_id = %call.id, error = %e, "skipping orphan tool result");
                }
            }
        }

        // Budget exhausted: a terminal outcome, not an error.
        self.events
            .publish(AgentEvent::text(EventKind::AgentResponse, MAX_TURNS_MESSAGE))
            .await;
        self.emit_turn_completed(iterations);
        Ok(AgentOutput {
            output: MAX_TURNS_MESSAGE.to_owned(),
            message: MAX_TURNS_MESSAGE.to_owned(),
        })
    }

    // ──────────────────────────────────────────────────────────────
    // Helpers
    // ──────────────────────────────────────────────────────────────

    /// Fold attachment paths into the instruction text and inline raster
    /// images as base64 blocks. Unreadable files are listed but skipped.
    fn prepare_instruction(
        &self,
        instruction: &str,
        attachments: &[String],
    ) -> (String, Vec<ImageRef>) {
        if attachments.is_empty() {
            return (instruction.to_owned(), Vec::new());
        }

        let mut text = format!("{instruction}\n\nAttached files:\n");
        let mut images = Vec::new();
        for path in attachments {
            text.push_str(&format!(" - {path}\n"));

            let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
            if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }
            let media_type = if ext == "jpg" { "jpeg".to_owned() } else { ext };

            let full = self.workspace_root.join(path);
            match std::fs::read(&full) {
                Ok(bytes) => images.push(ImageRef {
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                    media_type: format!("image/{media_type}"),
                }),
                Err(e) => {
                    tracing::warn!(path = %full.display(), error = %e, "skipping unreadable attachment");
                }
            }
        }
        (text, images)
    }

    async fn truncate_history(&self) -> Result<()> {
        let turns: Vec<Turn> = self.state.lock().turns().to_vec();
        if let Some(compacted) = self.context.truncate_if_needed(&turns).await? {
            self.state.lock().replace_turns(compacted);
        }
        Ok(())
    }

    /// Append a fake assistant turn carrying the interrupt marker and
    /// publish the interrupted-response event.
    async fn finish_interrupted(&self, fake_response: &str, output: &str) -> Result<AgentOutput> {
        if let Err(e) = self
            .state
            .lock()
            .append_assistant_turn(vec![Message::assistant(fake_response)])
        {
            tracing::warn!(error = %e, "could not append interrupt marker");
        }
        self.events
            .publish(AgentEvent::text(
                EventKind::AgentResponseInterrupted,
                fake_response,
            ))
            .await;
        Ok(AgentOutput {
            output: output.to_owned(),
            message: AGENT_INTERRUPT_MESSAGE.to_owned(),
        })
    }

    fn emit_turn_completed(&self, iterations: usize) {
        let usage = self.usage();
        TraceEvent::TurnCompleted {
            session_id: self.session_label.clone().unwrap_or_default(),
            iterations,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
        .emit();
    }
}
