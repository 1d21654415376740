//! `agentdock chat` — interactive REPL command.
//!
//! Opens a readline loop that sends each line to the agent and pumps the
//! event stream to the terminal. Slash commands cover session hygiene:
//! `/clear`, `/compact`, `/help`, `/exit`.

use std::sync::Arc;
use std::time::Duration;

use ad_domain::config::Config;
use ad_events::EventLogSubscriber;

use crate::bootstrap;
use crate::cli::console::ConsoleSubscriber;
use crate::cli::run::{cli_config, resolve_cli_session};
use crate::server::session::SessionRuntime;

/// Run the interactive chat REPL.
pub async fn chat(config: Config, name: Option<String>, resume: bool) -> anyhow::Result<()> {
    let config = Arc::new(cli_config(config));
    let model = crate::model::from_config(&config)?;
    let state =
        bootstrap::build_app_state(config, model, bootstrap::empty_tool_factory()).await?;

    let record = resolve_cli_session(&state, name.as_deref(), resume)?;
    let runtime = SessionRuntime::build(&state, &record)?;
    runtime.events.subscribe(Arc::new(ConsoleSubscriber::printing()));
    runtime.events.subscribe(Arc::new(EventLogSubscriber::new(
        state.event_log.clone(),
        record.id,
    )));

    // Readline with persistent history.
    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".agentdock")
        .join("chat_history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    eprintln!("AgentDock interactive chat");
    eprintln!(
        "Session: {}  |  Type /help for commands, Ctrl+D to exit",
        record.id
    );
    eprintln!();

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    if handle_slash_command(trimmed, &runtime, &state, &record.id).await {
                        break;
                    }
                    continue;
                }

                match runtime.controller.run(trimmed, &[]).await {
                    Ok(_) => runtime.save(&state, &record.id),
                    Err(e) => eprintln!("\x1b[31merror: {e}\x1b[0m"),
                }
                // Let the console catch up before the next prompt.
                runtime.events.drain(Duration::from_secs(2)).await;
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1b[31mreadline error: {e}\x1b[0m");
                break;
            }
        }
    }

    rl.save_history(&history_path).ok();
    runtime.save(&state, &record.id);
    runtime.events.drain(Duration::from_secs(1)).await;

    eprintln!("Goodbye!");
    Ok(())
}

/// Process a slash command. Returns `true` if the REPL should exit.
async fn handle_slash_command(
    input: &str,
    runtime: &SessionRuntime,
    state: &crate::state::AppState,
    session_id: &uuid::Uuid,
) -> bool {
    match input.split_whitespace().next().unwrap_or(input) {
        "/exit" | "/quit" => return true,

        "/clear" => {
            runtime.controller.clear();
            runtime.save(state, session_id);
            eprintln!("Conversation cleared.");
        }

        "/compact" => match runtime.controller.compact().await {
            Ok(report) => {
                runtime.save(state, session_id);
                eprintln!(
                    "Compacted: {} → {} tokens ({} saved)",
                    report.original_tokens, report.new_tokens, report.tokens_saved
                );
            }
            Err(e) => eprintln!("\x1b[31mcompact failed: {e}\x1b[0m"),
        },

        "/session" => {
            eprintln!("Session: {session_id}");
            eprintln!("Workspace: {}", runtime.workspace.root().display());
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /clear    Reset the conversation (keeps the session)");
            eprintln!("  /compact  Force a context compaction pass");
            eprintln!("  /session  Show session id and workspace");
            eprintln!("  /exit     Exit the chat");
            eprintln!("  /help     Show this help");
        }

        other => {
            eprintln!("Unknown command: {other}  (type /help for a list)");
        }
    }

    false
}
