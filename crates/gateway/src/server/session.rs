//! Per-connection chat session.
//!
//! A `ChatSession` owns the event stream, the controller, and the
//! confirmation gate for one session, and bridges them to a WebSocket
//! connection: a socket pusher and the durable event-log appender are
//! subscribed on open and detached (after a short drain) on close.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use ad_context::{CharEstimateCounter, ContextManager, StateMetadata};
use ad_domain::config::TruncationStrategy;
use ad_domain::error::Result;
use ad_domain::tool::ConfirmationDecision;
use ad_domain::{AgentEvent, EventKind};
use ad_events::{EventLogSubscriber, EventStream, Subscriber, SubscriberHandle};
use ad_runtime::AgentController;
use ad_sessions::{ResumePointer, SessionRecord, WorkspaceManager};
use ad_tools::{AutoApprovePolicy, ConfirmationGate, ToolDispatcher};

use crate::protocol::ClientMessage;
use crate::server::connections::OutboundFrame;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket pusher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Subscriber that forwards every event to the socket as one text frame,
/// stamped with the session id.
struct WebSocketPusher {
    session_id: Uuid,
    outbound: mpsc::Sender<OutboundFrame>,
}

#[async_trait::async_trait]
impl Subscriber for WebSocketPusher {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn handle_event(&self, event: AgentEvent) {
        let event = event.with_session(self.session_id);
        match serde_json::to_string(&event) {
            Ok(frame) => {
                if self.outbound.send(OutboundFrame::Text(frame)).await.is_err() {
                    tracing::debug!(session_id = %self.session_id, "socket gone; dropping event");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize event frame"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session runtime wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The per-session subsystems, wired once and shared by the WebSocket and
/// CLI surfaces.
pub struct SessionRuntime {
    pub events: EventStream,
    pub controller: Arc<AgentController>,
    pub gate: Arc<ConfirmationGate>,
    pub workspace: WorkspaceManager,
}

impl SessionRuntime {
    /// Build registry, gate, dispatcher, context manager, and controller
    /// for a session record, restoring any persisted dialogue.
    pub fn build(state: &AppState, record: &SessionRecord) -> Result<Self> {
        let workspace = WorkspaceManager::new(record.workspace_dir.clone());
        workspace.ensure()?;

        let registry = Arc::new((state.tool_factory)(&workspace));
        let gate = Arc::new(ConfirmationGate::new(Duration::from_secs(
            state.config.tools.confirmation_timeout_secs,
        )));
        let events = EventStream::new();
        let dispatcher = Arc::new(ToolDispatcher::new(
            registry,
            gate.clone(),
            AutoApprovePolicy::from_config(&state.config.tools),
            events.clone(),
            state.config.tools.read_only_concurrency,
        ));

        let mut context = ContextManager::new(
            Arc::new(CharEstimateCounter::new()),
            state.config.context.clone(),
        );
        if state.config.context.strategy == TruncationStrategy::Summarize {
            context = context.with_summarizer(state.model.clone());
        }

        let controller = Arc::new(
            AgentController::new(
                state.model.clone(),
                dispatcher,
                Arc::new(context),
                events.clone(),
                workspace.root().to_path_buf(),
                &state.config.agent,
            )
            .with_session_label(record.id.to_string()),
        );

        // Restore the persisted dialogue; a corrupt state file starts empty.
        match state.state_store.load(&record.id) {
            Ok((dialogue, _meta)) => {
                if !dialogue.is_empty() {
                    controller.restore_state(dialogue);
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %record.id, error = %e, "state load failed; starting empty");
            }
        }

        Ok(Self {
            events,
            controller,
            gate,
            workspace,
        })
    }

    /// Persist dialogue + metadata, bump the session record, and update the
    /// resume pointer. Save failures are logged, never fatal — the next
    /// turn retries.
    pub fn save(&self, state: &AppState, session_id: &Uuid) {
        let dialogue = self.controller.state_snapshot();
        let mut metadata =
            StateMetadata::new(*session_id, self.workspace.root().to_path_buf());
        metadata.last_message_at = Some(chrono::Utc::now());
        metadata.token_usage = self.controller.usage();

        if let Err(e) = state.state_store.save(session_id, &dialogue, &metadata) {
            tracing::warn!(session_id = %session_id, error = %e, "state save failed");
        }
        state.sessions.touch_message(session_id);
        if let Err(e) =
            ResumePointer::write(&state.config.workspace.state_path, *session_id, self.workspace.root())
        {
            tracing::warn!(error = %e, "resume pointer write failed");
        }
        if let Err(e) = state.sessions.flush() {
            tracing::warn!(error = %e, "session store flush failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChatSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ChatSession {
    session_id: Uuid,
    app: AppState,
    runtime: SessionRuntime,
    ws_handle: SubscriberHandle,
    log_handle: SubscriberHandle,
    active_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ChatSession {
    /// Create or resume a session for one connection and wire both
    /// subscribers. Answers with `connection_established`.
    pub async fn open(
        app: AppState,
        session_id: Option<Uuid>,
        device_id: Option<String>,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<Arc<Self>> {
        let id = session_id.unwrap_or_else(Uuid::new_v4);
        let (record, is_new) = app.sessions.resolve_or_create(id, device_id)?;
        tracing::info!(session_id = %id, is_new, "chat session opened");

        let runtime = SessionRuntime::build(&app, &record)?;

        let ws_handle = runtime.events.subscribe(Arc::new(WebSocketPusher {
            session_id: id,
            outbound,
        }));
        let log_handle = runtime
            .events
            .subscribe(Arc::new(EventLogSubscriber::new(app.event_log.clone(), id)));

        runtime
            .events
            .publish(AgentEvent::new(
                EventKind::ConnectionEstablished,
                serde_json::json!({
                    "message": "Connected to AgentDock",
                    "workspace_path": runtime.workspace.root(),
                }),
            ))
            .await;

        Ok(Arc::new(Self {
            session_id: id,
            app,
            runtime,
            ws_handle,
            log_handle,
            active_task: Mutex::new(None),
        }))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn has_active_task(&self) -> bool {
        self.active_task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Route one already-parsed client message.
    pub async fn handle(self: &Arc<Self>, message: ClientMessage) {
        match message {
            ClientMessage::InitAgent { .. } => {
                self.publish_error("agent is already initialized on this connection")
                    .await;
            }

            ClientMessage::UserMessage { text, attachments } => {
                self.handle_user_message(text, attachments).await;
            }

            ClientMessage::Cancel {} => {
                self.runtime.controller.cancel();
            }

            ClientMessage::ToolConfirmationResponse {
                tool_call_id,
                approved,
                alternative,
            } => {
                let decision = if approved {
                    ConfirmationDecision::approved()
                } else {
                    ConfirmationDecision::denied(alternative)
                };
                if !self.runtime.gate.resolve(&tool_call_id, decision) {
                    tracing::warn!(%tool_call_id, "confirmation response for unknown call");
                    self.publish_error(format!(
                        "no pending confirmation for tool call {tool_call_id}"
                    ))
                    .await;
                }
            }

            ClientMessage::Clear {} => {
                self.runtime.controller.clear();
                self.runtime
                    .events
                    .publish(AgentEvent::text(
                        EventKind::SystemMessage,
                        "Conversation cleared",
                    ))
                    .await;
            }

            ClientMessage::Compact {} => match self.runtime.controller.compact().await {
                Ok(_report) => self.runtime.save(&self.app, &self.session_id),
                Err(e) => self.publish_error(format!("compact failed: {e}")).await,
            },
        }
    }

    async fn handle_user_message(self: &Arc<Self>, text: String, attachments: Vec<String>) {
        if self.has_active_task() {
            self.publish_error("agent busy: a run is already in progress")
                .await;
            return;
        }

        self.runtime
            .events
            .publish(AgentEvent::new(
                EventKind::Processing,
                serde_json::json!({ "message": "Processing your request" }),
            ))
            .await;
        self.runtime
            .events
            .publish(AgentEvent::text(EventKind::UserMessage, text.clone()))
            .await;

        let this = self.clone();
        let task = tokio::spawn(async move {
            match this.runtime.controller.run(&text, &attachments).await {
                Ok(output) => {
                    tracing::debug!(session_id = %this.session_id, message = %output.message, "run finished");
                }
                Err(e) => {
                    // The controller already published the error event.
                    tracing::error!(session_id = %this.session_id, error = %e, "run aborted");
                }
            }
            this.runtime.save(&this.app, &this.session_id);
        });
        *self.active_task.lock() = Some(task);
    }

    async fn publish_error(&self, message: impl Into<String>) {
        self.runtime
            .events
            .publish(AgentEvent::error(message.into()))
            .await;
    }

    /// Disconnect path: cancel the running turn, wait for it briefly, save
    /// state, detach both subscribers, and drain the stream.
    pub async fn close(&self) {
        self.runtime.controller.cancel();

        let task = self.active_task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(Duration::from_secs(10), task)
                .await
                .is_err()
            {
                tracing::warn!(session_id = %self.session_id, "active run did not stop in time");
            }
        }

        self.runtime.save(&self.app, &self.session_id);
        self.runtime.events.unsubscribe(self.ws_handle);
        self.runtime.events.unsubscribe(self.log_handle);
        self.runtime.events.drain(Duration::from_secs(1)).await;
        tracing::info!(session_id = %self.session_id, "chat session closed");
    }
}
