//! Conversation state, token-budgeted context compaction, and durable
//! state persistence.

pub mod manager;
pub mod persist;
pub mod state;
pub mod tokens;

pub use manager::ContextManager;
pub use persist::{atomic_write_json, StateMetadata, StateStore, METADATA_VERSION};
pub use state::{ConversationState, Role, Turn};
pub use tokens::{CharEstimateCounter, TokenCounter};
