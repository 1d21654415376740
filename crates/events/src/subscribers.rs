//! Built-in subscribers: the durable event-log appender.
//!
//! Socket pushers and console renderers live with their transports in the
//! gateway; only the storage-facing subscriber is transport-free and lives
//! here.

use std::sync::Arc;

use uuid::Uuid;

use ad_domain::AgentEvent;

use crate::log::EventLogWriter;
use crate::stream::Subscriber;

/// Durable observer: appends every event to the session's JSONL log.
pub struct EventLogSubscriber {
    writer: Arc<EventLogWriter>,
    session_id: Uuid,
}

impl EventLogSubscriber {
    pub fn new(writer: Arc<EventLogWriter>, session_id: Uuid) -> Self {
        Self { writer, session_id }
    }
}

#[async_trait::async_trait]
impl Subscriber for EventLogSubscriber {
    fn name(&self) -> &str {
        "event_log"
    }

    async fn handle_event(&self, event: AgentEvent) {
        if let Err(e) = self.writer.append(&self.session_id, &event) {
            tracing::warn!(
                session_id = %self.session_id,
                error = %e,
                "event log append failed"
            );
        }
    }
}
