use std::sync::Arc;

use ad_context::StateStore;
use ad_domain::config::Config;
use ad_domain::model::ModelClient;
use ad_events::EventLogWriter;
use ad_sessions::{SessionStore, WorkspaceManager};
use ad_tools::ToolRegistry;

use crate::server::connections::ConnectionManager;

/// Builds the per-session tool registry. The default registers nothing;
/// embedders supply their own tools through
/// [`crate::bootstrap::build_app_state`].
pub type ToolRegistryFactory = Arc<dyn Fn(&WorkspaceManager) -> ToolRegistry + Send + Sync>;

/// Shared application state passed to all handlers and CLI commands.
///
/// Fields are grouped by concern:
/// - **Core services** — config, the injected model client, tool factory
/// - **Persistence** — session records, dialogue state, event logs
/// - **Connections** — the WebSocket connection registry
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub model: Arc<dyn ModelClient>,
    pub tool_factory: ToolRegistryFactory,

    // ── Persistence ───────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub state_store: Arc<StateStore>,
    pub event_log: Arc<EventLogWriter>,

    // ── Connections ───────────────────────────────────────────────────
    pub connections: Arc<ConnectionManager>,
}
