//! AgentDock gateway: the WebSocket surface, session wiring, CLI, and
//! bootstrap. Embedders build an [`state::AppState`] with their own
//! [`ad_domain::ModelClient`] and tool factory, then call
//! [`server::serve`].

pub mod bootstrap;
pub mod cli;
pub mod model;
pub mod protocol;
pub mod server;
pub mod state;
