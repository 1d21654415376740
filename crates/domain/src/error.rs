/// Shared error type used across all AgentDock crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("orphan tool result for call {0}")]
    OrphanToolResult(String),

    #[error("turn order violation: {0}")]
    TurnOrder(String),

    #[error("model provider: {0}")]
    Provider(String),

    #[error("tool {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("confirmation timed out for call {0}")]
    ConfirmationTimeout(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
