//! Console event pump — renders the per-session event stream for the
//! `run` and `chat` commands. Assistant prose goes to stdout; everything
//! else is dimmed onto stderr so piped output stays clean.

use std::io::Write;

use parking_lot::Mutex;

use ad_domain::{AgentEvent, EventKind};
use ad_events::Subscriber;

pub struct ConsoleSubscriber {
    /// Collect events instead of printing (for `--json`).
    collected: Option<Mutex<Vec<AgentEvent>>>,
}

impl ConsoleSubscriber {
    pub fn printing() -> Self {
        Self { collected: None }
    }

    pub fn collecting() -> Self {
        Self {
            collected: Some(Mutex::new(Vec::new())),
        }
    }

    pub fn take_collected(&self) -> Vec<AgentEvent> {
        self.collected
            .as_ref()
            .map(|c| std::mem::take(&mut *c.lock()))
            .unwrap_or_default()
    }

    fn print(&self, event: &AgentEvent) {
        match event.kind {
            EventKind::AgentThinking => {
                eprint!("\x1b[2m…\x1b[0m");
                std::io::stderr().flush().ok();
            }
            EventKind::AgentResponse => {
                if let Some(text) = event.content["text"].as_str() {
                    println!("{text}");
                }
            }
            EventKind::AgentResponseInterrupted => {
                eprintln!("\x1b[33m(interrupted)\x1b[0m");
            }
            EventKind::ToolCall => {
                let name = event.content["tool_name"].as_str().unwrap_or("?");
                eprintln!("\x1b[2m[tool: {name}]\x1b[0m");
            }
            EventKind::ToolResult => {
                let name = event.content["tool_name"].as_str().unwrap_or("?");
                let result = event.content["result"].as_str().unwrap_or("");
                let first_line = result.lines().next().unwrap_or("");
                eprintln!("\x1b[2m[tool: {name} → {first_line}]\x1b[0m");
            }
            EventKind::ToolConfirmation => {
                let name = event.content["tool_name"].as_str().unwrap_or("?");
                let message = event.content["message"].as_str().unwrap_or("");
                eprintln!("\x1b[33m[confirmation requested: {name}] {message}\x1b[0m");
            }
            EventKind::Error => {
                let message = event.content["message"].as_str().unwrap_or("unknown error");
                eprintln!("\x1b[31merror: {message}\x1b[0m");
            }
            EventKind::CompactDone => {
                let saved = event.content["tokens_saved"].as_u64().unwrap_or(0);
                eprintln!("\x1b[2m[compacted: {saved} tokens saved]\x1b[0m");
            }
            EventKind::SystemMessage => {
                if let Some(text) = event.content["text"].as_str() {
                    eprintln!("\x1b[2m{text}\x1b[0m");
                }
            }
            // Handshake/bookkeeping events stay silent on the console.
            EventKind::Processing
            | EventKind::ConnectionEstablished
            | EventKind::UserMessage
            | EventKind::SubscriberLag => {}
        }
    }
}

#[async_trait::async_trait]
impl Subscriber for ConsoleSubscriber {
    fn name(&self) -> &str {
        "console"
    }

    async fn handle_event(&self, event: AgentEvent) {
        match &self.collected {
            Some(collected) => collected.lock().push(event),
            None => self.print(&event),
        }
    }
}
