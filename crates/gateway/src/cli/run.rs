//! `agentdock run` — one-shot execution command.
//!
//! Sends a single instruction to the agent, pumps the event stream to the
//! console, saves the session, and exits. Useful for scripting and piping.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use ad_domain::config::Config;
use ad_events::EventLogSubscriber;
use ad_sessions::{ResumePointer, SessionRecord};

use crate::bootstrap;
use crate::cli::console::ConsoleSubscriber;
use crate::server::session::SessionRuntime;
use crate::state::AppState;

/// Execute a single agent turn and print the response.
pub async fn run(
    config: Config,
    task: String,
    files: Vec<String>,
    name: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let config = Arc::new(cli_config(config));
    let model = crate::model::from_config(&config)?;
    let state =
        bootstrap::build_app_state(config, model, bootstrap::empty_tool_factory()).await?;

    let record = resolve_cli_session(&state, name.as_deref(), false)?;
    let runtime = SessionRuntime::build(&state, &record)?;

    let console = Arc::new(if json {
        ConsoleSubscriber::collecting()
    } else {
        ConsoleSubscriber::printing()
    });
    runtime.events.subscribe(console.clone());
    runtime.events.subscribe(Arc::new(EventLogSubscriber::new(
        state.event_log.clone(),
        record.id,
    )));

    let result = runtime.controller.run(&task, &files).await;

    runtime.save(&state, &record.id);
    runtime.events.drain(Duration::from_secs(2)).await;

    let output = result?;
    if json {
        let report = serde_json::json!({
            "output": output.output,
            "message": output.message,
            "session_id": record.id,
            "events": console.take_collected(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

/// CLI turns run on behalf of the local user; confirmations are
/// auto-approved since there is no second party to ask.
pub(crate) fn cli_config(mut config: Config) -> Config {
    config.tools.auto_approve = true;
    config
}

/// Pick the session for a CLI invocation: `--resume` takes the pointer,
/// `--name` finds (or creates) a named session, otherwise a fresh one.
pub(crate) fn resolve_cli_session(
    state: &AppState,
    name: Option<&str>,
    resume: bool,
) -> anyhow::Result<SessionRecord> {
    if resume {
        if let Some(pointer) = ResumePointer::read(&state.config.workspace.state_path) {
            let (record, _) = state
                .sessions
                .resolve_or_create(pointer.current_session_id, None)?;
            return Ok(record);
        }
        tracing::warn!("no session to resume; starting fresh");
    }

    if let Some(name) = name {
        if let Some(existing) = state
            .sessions
            .list()
            .into_iter()
            .find(|r| r.name.as_deref() == Some(name))
        {
            let (record, _) = state.sessions.resolve_or_create(existing.id, None)?;
            return Ok(record);
        }
        let (record, _) = state.sessions.resolve_or_create(Uuid::new_v4(), None)?;
        state.sessions.rename(&record.id, Some(name.to_owned()));
        return Ok(state.sessions.get(&record.id).unwrap_or(record));
    }

    let (record, _) = state.sessions.resolve_or_create(Uuid::new_v4(), None)?;
    Ok(record)
}
