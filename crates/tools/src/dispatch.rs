//! Batched tool dispatch.
//!
//! Given the pending calls of one model step, the dispatcher gates
//! mutating tools on user confirmation, runs read-only calls concurrently
//! under a semaphore, runs mutating calls strictly serially in submission
//! order (and only after every read-only call has finished), and shapes
//! every outcome into a uniform [`ToolResult`]. Failures never abort the
//! batch; results come back in submission order regardless of completion
//! order.

use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;

use ad_domain::tool::{ConfirmationDecision, Tool, ToolCallParameters, ToolResult};
use ad_domain::{AgentEvent, CancelToken, EventKind};
use ad_events::EventStream;

use crate::confirm::{AutoApprovePolicy, ConfirmationGate};
use crate::registry::ToolRegistry;

/// Canonical placeholder installed for calls overtaken by a cancel.
pub const TOOL_INTERRUPT_MESSAGE: &str = "[Request interrupted by user for tool use]";

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    gate: Arc<ConfirmationGate>,
    policy: AutoApprovePolicy,
    events: EventStream,
    read_only_limit: usize,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        gate: Arc<ConfirmationGate>,
        policy: AutoApprovePolicy,
        events: EventStream,
        read_only_limit: usize,
    ) -> Self {
        Self {
            registry,
            gate,
            policy,
            events,
            read_only_limit: read_only_limit.max(1),
        }
    }

    pub fn gate(&self) -> &Arc<ConfirmationGate> {
        &self.gate
    }

    /// The registered tool surface, in registration order.
    pub fn descriptors(&self) -> Vec<ad_domain::tool::ToolDescriptor> {
        self.registry.descriptors()
    }

    /// Execute one batch of pending tool calls. Always returns exactly one
    /// result per call, in submission order.
    pub async fn run_batch(
        &self,
        calls: &[ToolCallParameters],
        cancel: &CancelToken,
    ) -> Vec<ToolResult> {
        let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];

        // ── Confirmation pass ────────────────────────────────────────
        // Sequential: confirmations are a dialogue with one human.
        let mut approved: Vec<(usize, Arc<dyn Tool>, bool)> = Vec::new();
        for (idx, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                results[idx] = Some(ToolResult::text(TOOL_INTERRUPT_MESSAGE));
                continue;
            }

            let tool = match self.registry.get(&call.name) {
                Ok(tool) => tool,
                Err(e) => {
                    tracing::warn!(tool = %call.name, "dispatch to unknown tool");
                    results[idx] = Some(ToolResult::error(e.to_string()));
                    continue;
                }
            };

            if let Some(request) = tool.should_confirm(&call.input) {
                if !self.policy.covers(&call.name) {
                    self.events
                        .publish(AgentEvent::new(
                            EventKind::ToolConfirmation,
                            serde_json::json!({
                                "tool_call_id": call.id,
                                "tool_name": call.name,
                                "tool_input": call.input,
                                "kind": request.kind,
                                "message": request.message,
                            }),
                        ))
                        .await;

                    let rx = self.gate.register(&call.id, &call.name);
                    let decision = self.gate.await_decision(&call.id, rx, cancel).await;
                    if !decision.approved {
                        results[idx] = Some(denial_result(&call.name, &decision));
                        continue;
                    }
                }
            }

            let read_only = tool.descriptor().read_only;
            approved.push((idx, tool, read_only));
        }

        // ── Scheduling pass ──────────────────────────────────────────
        let (read_only, mutating): (Vec<_>, Vec<_>) =
            approved.into_iter().partition(|(_, _, ro)| *ro);

        // Read-only calls run concurrently; latency is max, not sum.
        // join_all keeps result order aligned with submission order.
        let semaphore = Arc::new(Semaphore::new(self.read_only_limit));
        let read_only_futures: Vec<_> = read_only
            .into_iter()
            .map(|(idx, tool, _)| {
                let call = &calls[idx];
                let semaphore = semaphore.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (idx, ToolResult::text(TOOL_INTERRUPT_MESSAGE));
                    }
                    let Ok(_permit) = semaphore.acquire().await else {
                        return (idx, ToolResult::error("dispatcher shut down"));
                    };
                    (idx, self.execute_one(&tool, call, cancel).await)
                }
            })
            .collect();
        for (idx, result) in join_all(read_only_futures).await {
            results[idx] = Some(result);
        }

        // Every read-only call has finished; mutating calls now run one at
        // a time, in submission order, against the latest visible state.
        for (idx, tool, _) in mutating {
            let call = &calls[idx];
            if cancel.is_cancelled() {
                results[idx] = Some(ToolResult::text(TOOL_INTERRUPT_MESSAGE));
                continue;
            }
            results[idx] = Some(self.execute_one(&tool, call, cancel).await);
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| ToolResult::error("tool call was never scheduled")))
            .collect()
    }

    /// Run one approved call: `ToolCall` event, guarded execution,
    /// `ToolResult` event.
    async fn execute_one(
        &self,
        tool: &Arc<dyn Tool>,
        call: &ToolCallParameters,
        cancel: &CancelToken,
    ) -> ToolResult {
        self.events
            .publish(AgentEvent::new(
                EventKind::ToolCall,
                serde_json::json!({
                    "tool_call_id": call.id,
                    "tool_name": call.name,
                    "tool_input": call.input,
                }),
            ))
            .await;

        tracing::debug!(tool = %call.name, call_id = %call.id, "running tool");
        let result = execute_guarded(tool, &call.name, call.input.clone(), cancel).await;

        self.events
            .publish(AgentEvent::new(
                EventKind::ToolResult,
                serde_json::json!({
                    "tool_call_id": call.id,
                    "tool_name": call.name,
                    "result": result.user_display_content,
                    "is_error": result.is_error,
                }),
            ))
            .await;

        result
    }
}

/// Deterministic denial text fed back to the model in place of running the
/// tool.
fn denial_result(tool_name: &str, decision: &ConfirmationDecision) -> ToolResult {
    let mut message = format!("Tool execution denied for: {tool_name}");
    if let Some(alt) = decision.alternative.as_deref().filter(|a| !a.is_empty()) {
        message.push_str(&format!("\nAlternative instructions: {alt}"));
    }
    ToolResult::text(message)
}

/// Run a tool, converting `Err` returns and panics into error results so
/// the batch (and the turn loop above it) keeps going.
async fn execute_guarded(
    tool: &Arc<dyn Tool>,
    name: &str,
    input: Value,
    cancel: &CancelToken,
) -> ToolResult {
    let fut = std::panic::AssertUnwindSafe(tool.execute(input, cancel)).catch_unwind();
    match fut.await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::warn!(tool = %name, error = %e, "tool execution failed");
            ToolResult::error(format!("Tool execution error for {name}: {e}"))
        }
        Err(_) => {
            tracing::error!(tool = %name, "tool panicked");
            ToolResult::error(format!("Tool execution error for {name}: panic"))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
