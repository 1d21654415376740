//! Tool confirmation gate — pauses mutating tool calls until a human
//! approves or denies them.
//!
//! Each pending confirmation is keyed by its tool-call id and holds a
//! `oneshot::Sender` that unblocks the waiting dispatcher when resolved.
//! Every entry resolves at most once; a timeout or session cancel counts
//! as a denial, so the system never blocks indefinitely.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::oneshot;

use ad_domain::config::ToolsConfig;
use ad_domain::tool::ConfirmationDecision;
use ad_domain::CancelToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auto-approve policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session policy that short-circuits the gate for trusted tools.
#[derive(Debug, Clone, Default)]
pub struct AutoApprovePolicy {
    pub approve_all: bool,
    pub allow_tools: std::collections::HashSet<String>,
}

impl AutoApprovePolicy {
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            approve_all: config.auto_approve,
            allow_tools: config.allow_tools.iter().cloned().collect(),
        }
    }

    pub fn covers(&self, tool_name: &str) -> bool {
        self.approve_all || self.allow_tools.contains(tool_name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PendingConfirmation {
    tool_name: String,
    created_at: DateTime<Utc>,
    respond: oneshot::Sender<ConfirmationDecision>,
}

/// Serializable snapshot of a pending confirmation (for introspection).
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationInfo {
    pub tool_call_id: String,
    pub tool_name: String,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe store of confirmations awaiting a human decision.
pub struct ConfirmationGate {
    pending: RwLock<HashMap<String, PendingConfirmation>>,
    timeout: Duration,
}

impl ConfirmationGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a pending confirmation for a tool call. Returns the
    /// receiver the dispatcher waits on.
    pub fn register(
        &self,
        tool_call_id: &str,
        tool_name: &str,
    ) -> oneshot::Receiver<ConfirmationDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(
            tool_call_id.to_owned(),
            PendingConfirmation {
                tool_name: tool_name.to_owned(),
                created_at: Utc::now(),
                respond: tx,
            },
        );
        rx
    }

    /// Resolve a pending confirmation by tool-call id. Returns `true` if an
    /// entry was found (each entry resolves at most once).
    pub fn resolve(&self, tool_call_id: &str, decision: ConfirmationDecision) -> bool {
        if let Some(pending) = self.pending.write().remove(tool_call_id) {
            let _ = pending.respond.send(decision);
            return true;
        }
        false
    }

    /// List all currently pending confirmations.
    pub fn list_pending(&self) -> Vec<ConfirmationInfo> {
        self.pending
            .read()
            .iter()
            .map(|(id, p)| ConfirmationInfo {
                tool_call_id: id.clone(),
                tool_name: p.tool_name.clone(),
                created_at: p.created_at,
            })
            .collect()
    }

    /// Wait for the user's decision. Timeout and session cancel both
    /// resolve to a denial; the entry is removed either way.
    pub async fn await_decision(
        &self,
        tool_call_id: &str,
        mut rx: oneshot::Receiver<ConfirmationDecision>,
        cancel: &CancelToken,
    ) -> ConfirmationDecision {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            tokio::select! {
                decision = &mut rx => {
                    // A dropped sender means the entry was cleared without a
                    // decision; treat that as a denial too.
                    return decision.unwrap_or_else(|_| ConfirmationDecision::denied(None));
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    if cancel.is_cancelled() {
                        self.pending.write().remove(tool_call_id);
                        return ConfirmationDecision::denied(Some("Operation interrupted".into()));
                    }
                    if tokio::time::Instant::now() >= deadline {
                        self.pending.write().remove(tool_call_id);
                        tracing::warn!(tool_call_id, "confirmation timed out; denying");
                        return ConfirmationDecision::denied(Some("Confirmation timeout".into()));
                    }
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn make_gate() -> ConfirmationGate {
        ConfirmationGate::new(Duration::from_secs(300))
    }

    #[test]
    fn register_and_list() {
        let gate = make_gate();
        let _rx = gate.register("c1", "rm");

        let pending = gate.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool_call_id, "c1");
        assert_eq!(pending[0].tool_name, "rm");
    }

    #[tokio::test]
    async fn approve_resolves_waiter() {
        let gate = make_gate();
        let rx = gate.register("c1", "rm");

        assert!(gate.resolve("c1", ConfirmationDecision::approved()));
        let cancel = CancelToken::new();
        let decision = gate.await_decision("c1", rx, &cancel).await;
        assert!(decision.approved);
        assert!(gate.list_pending().is_empty());
    }

    #[tokio::test]
    async fn deny_carries_alternative() {
        let gate = make_gate();
        let rx = gate.register("c1", "rm");

        assert!(gate.resolve(
            "c1",
            ConfirmationDecision::denied(Some("list instead".into()))
        ));
        let decision = gate
            .await_decision("c1", rx, &CancelToken::new())
            .await;
        assert!(!decision.approved);
        assert_eq!(decision.alternative.as_deref(), Some("list instead"));
    }

    #[test]
    fn resolve_nonexistent_returns_false() {
        let gate = make_gate();
        assert!(!gate.resolve("ghost", ConfirmationDecision::approved()));
    }

    #[test]
    fn resolve_is_once() {
        let gate = make_gate();
        let _rx = gate.register("c1", "rm");
        assert!(gate.resolve("c1", ConfirmationDecision::approved()));
        assert!(!gate.resolve("c1", ConfirmationDecision::approved()));
    }

    #[tokio::test]
    async fn timeout_denies() {
        let gate = ConfirmationGate::new(Duration::from_millis(150));
        let rx = gate.register("c1", "rm");

        let decision = gate
            .await_decision("c1", rx, &CancelToken::new())
            .await;
        assert!(!decision.approved);
        assert_eq!(decision.alternative.as_deref(), Some("Confirmation timeout"));
        assert!(gate.list_pending().is_empty());
    }

    #[tokio::test]
    async fn cancel_denies_unresolved() {
        let gate = make_gate();
        let rx = gate.register("c1", "rm");

        let cancel = CancelToken::new();
        cancel.cancel();
        let decision = gate.await_decision("c1", rx, &cancel).await;
        assert!(!decision.approved);
        assert!(gate.list_pending().is_empty());
    }

    #[test]
    fn policy_covers() {
        let mut policy = AutoApprovePolicy::default();
        assert!(!policy.covers("rm"));

        policy.allow_tools.insert("rm".into());
        assert!(policy.covers("rm"));
        assert!(!policy.covers("mv"));

        policy.approve_all = true;
        assert!(policy.covers("mv"));
    }
}
