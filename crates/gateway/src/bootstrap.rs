//! AppState construction and background-task spawning shared by `serve`,
//! `run`, and `chat` so every surface boots the same runtime.

use std::sync::Arc;
use std::time::Duration;

use ad_context::StateStore;
use ad_domain::config::{Config, ConfigSeverity};
use ad_domain::model::ModelClient;
use ad_events::EventLogWriter;
use ad_sessions::SessionStore;
use ad_tools::ToolRegistry;
use tracing_subscriber::EnvFilter;

use crate::server::connections::ConnectionManager;
use crate::state::{AppState, ToolRegistryFactory};

/// Initialize structured tracing (used by the `serve` command).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ad_gateway=debug")),
        )
        .init();
}

/// The default factory registers no tools; embedders plug theirs in here.
pub fn empty_tool_factory() -> ToolRegistryFactory {
    Arc::new(|_workspace| ToolRegistry::new())
}

/// Validate config, initialize every subsystem, and return a fully wired
/// [`AppState`].
pub async fn build_app_state(
    config: Arc<Config>,
    model: Arc<dyn ModelClient>,
    tool_factory: ToolRegistryFactory,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Persistence ──────────────────────────────────────────────────
    let state_path = &config.workspace.state_path;
    let sessions = Arc::new(SessionStore::new(state_path, &config.workspace.path)?);
    let state_store = Arc::new(StateStore::new(state_path)?);
    let event_log = Arc::new(EventLogWriter::new(state_path)?);

    tracing::info!(
        state_path = %state_path.display(),
        workspace = %config.workspace.path.display(),
        model = model.name(),
        "runtime ready"
    );

    Ok(AppState {
        config,
        model,
        tool_factory,
        sessions,
        state_store,
        event_log,
        connections: Arc::new(ConnectionManager::new()),
    })
}

/// Long-lived background work: the idle-connection sweep.
pub fn spawn_background_tasks(state: &AppState) {
    let connections = state.connections.clone();
    let sweep_every = Duration::from_secs(state.config.server.sweep_interval_secs.max(1));
    let idle_timeout = Duration::from_secs(state.config.server.idle_timeout_secs);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let closed = connections.sweep_idle(idle_timeout);
            if closed > 0 {
                tracing::info!(closed, "idle connection sweep");
            }
        }
    });
}
