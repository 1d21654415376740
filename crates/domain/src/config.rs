use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_8100")]
    pub port: u16,
    /// Bearer token required on WebSocket connects. `None` = dev mode.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// How often the idle-connection sweep runs.
    #[serde(default = "d_300")]
    pub sweep_interval_secs: u64,
    /// Connections idle longer than this are closed by the sweep.
    #[serde(default = "d_3600")]
    pub idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: 8100,
            auth_token: None,
            sweep_interval_secs: 300,
            idle_timeout_secs: 3600,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace & state paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root under which per-session workspace directories are created.
    #[serde(default = "d_ws_path")]
    pub path: PathBuf,
    /// Root for durable state (sessions.json, state files, event logs).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: d_ws_path(),
            state_path: d_state_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard ceiling on model↔tool iterations per user input.
    #[serde(default = "d_200")]
    pub max_turns: usize,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 200,
            max_output_tokens: None,
            system_prompt: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncationStrategy {
    /// Summarize old assistant turns with the model.
    Summarize,
    /// Replace old assistant turns with a fixed elision marker.
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Model input-token budget that triggers truncation.
    #[serde(default = "d_120000")]
    pub token_budget: usize,
    #[serde(default = "d_strategy")]
    pub strategy: TruncationStrategy,
    /// Cap on the summarizer's own output.
    #[serde(default = "d_2000")]
    pub summary_max_tokens: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: 120_000,
            strategy: TruncationStrategy::Summarize,
            summary_max_tokens: 2000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Concurrency cap for read-only tool calls in one batch.
    #[serde(default = "d_8")]
    pub read_only_concurrency: usize,
    /// Seconds to wait for a confirmation response before denying.
    #[serde(default = "d_300")]
    pub confirmation_timeout_secs: u64,
    /// Approve every confirmation without asking.
    #[serde(default)]
    pub auto_approve: bool,
    /// Tool names approved without asking.
    #[serde(default)]
    pub allow_tools: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            read_only_concurrency: 8,
            confirmation_timeout_secs: 300,
            auto_approve: false,
            allow_tools: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model provider selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider id resolved by the gateway (`"replay"` is built in; real
    /// providers are injected by the embedder).
    #[serde(default = "d_provider")]
    pub provider: String,
    /// Provider-specific options (e.g. the replay script path).
    #[serde(default = "d_options")]
    pub options: serde_json::Value,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: d_provider(),
            options: d_options(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Sanity-check the resolved configuration. Errors prevent startup.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.agent.max_turns == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "agent.max_turns must be at least 1".into(),
            });
        }
        if self.tools.read_only_concurrency == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "tools.read_only_concurrency must be at least 1".into(),
            });
        }
        if self.context.token_budget < 1000 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "context.token_budget = {} is very small; truncation will be aggressive",
                    self.context.token_budget
                ),
            });
        }
        if self.server.auth_token.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "server.auth_token is unset; WebSocket connections are unauthenticated"
                    .into(),
            });
        }

        issues
    }
}

// ── serde default helpers ─────────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_8100() -> u16 {
    8100
}
fn d_8() -> usize {
    8
}
fn d_200() -> usize {
    200
}
fn d_300() -> u64 {
    300
}
fn d_3600() -> u64 {
    3600
}
fn d_2000() -> u32 {
    2000
}
fn d_120000() -> usize {
    120_000
}
fn d_strategy() -> TruncationStrategy {
    TruncationStrategy::Summarize
}
fn d_provider() -> String {
    "replay".into()
}
fn d_options() -> serde_json::Value {
    serde_json::json!({})
}
fn d_ws_path() -> PathBuf {
    PathBuf::from("./workspace")
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8100);
        assert_eq!(config.agent.max_turns, 200);
        assert_eq!(config.tools.read_only_concurrency, 8);
        assert_eq!(config.tools.confirmation_timeout_secs, 300);
        assert_eq!(config.context.strategy, TruncationStrategy::Summarize);
    }

    #[test]
    fn partial_section_fills_rest() {
        let config: Config = toml::from_str(
            r#"
            [tools]
            read_only_concurrency = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.tools.read_only_concurrency, 2);
        assert_eq!(config.tools.confirmation_timeout_secs, 300);
    }

    #[test]
    fn validate_flags_zero_turns() {
        let mut config = Config::default();
        config.agent.max_turns = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("max_turns")));
    }
}
