use serde::Serialize;

/// Structured trace events emitted across all AgentDock crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_id: String,
        is_new: bool,
    },
    StateSaved {
        session_id: String,
        turns: usize,
    },
    StateLoaded {
        session_id: String,
        turns: usize,
    },
    EventLogAppend {
        session_id: String,
        kind: String,
    },
    SubscriberLagged {
        subscriber: String,
        dropped_total: u64,
    },
    ContextTruncated {
        original_tokens: usize,
        new_tokens: usize,
        turns_summarized: usize,
        turns_dropped: usize,
    },
    TurnCompleted {
        session_id: String,
        iterations: usize,
        input_tokens: u64,
        output_tokens: u64,
    },
    ConnectionClosed {
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ad_event");
    }
}
