//! The agent controller: one turn loop per session.

pub mod controller;

pub use controller::{AgentController, AgentOutput, CompactReport, AGENT_INTERRUPT_MESSAGE};
