//! Shared domain types for AgentDock: the dialogue message model, the
//! event taxonomy, tool and model capabilities, cancellation, errors, and
//! configuration. Every other crate depends on this one and nothing else
//! in the workspace.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod tool;
pub mod trace;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use event::{AgentEvent, EventKind};
pub use message::{ContentBlock, ImageRef, Message, ToolOutput};
pub use model::{ModelClient, ModelRequest, ModelTurn, TokenUsage};
pub use tool::{
    ConfirmationDecision, ConfirmationKind, ConfirmationRequest, Tool, ToolCallParameters,
    ToolDescriptor, ToolResult,
};
