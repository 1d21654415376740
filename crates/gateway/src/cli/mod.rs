pub mod chat;
pub mod config;
pub mod console;
pub mod doctor;
pub mod run;
pub mod sessions;

use clap::{Parser, Subcommand};

/// AgentDock — an agentic execution platform.
#[derive(Debug, Parser)]
#[command(name = "agentdock", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the WebSocket server (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Run one non-interactive agent turn and exit.
    Run {
        /// The instruction to send.
        #[arg(long)]
        task: String,
        /// Workspace-relative file attachments (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,
        /// Named session to use (created if absent).
        #[arg(long)]
        name: Option<String>,
        /// Emit the full event list as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Interactive REPL.
    Chat {
        /// Named session to use (created if absent).
        #[arg(long)]
        name: Option<String>,
        /// Resume the most recent session.
        #[arg(long)]
        resume: bool,
    },
    /// List known sessions.
    Sessions,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `AGENTDOCK_CONFIG`
/// (or `config.toml` by default). Shared by every subcommand.
pub fn load_config() -> anyhow::Result<(ad_domain::config::Config, String)> {
    let config_path =
        std::env::var("AGENTDOCK_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        ad_domain::config::Config::default()
    };

    Ok((config, config_path))
}
