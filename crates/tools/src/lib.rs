//! Tool registry, confirmation gating, and batched dispatch.
//!
//! Scheduling contract: read-only calls in a batch run concurrently under
//! a semaphore; mutating calls run strictly serially in submission order,
//! and never before every read-only call has completed.

pub mod confirm;
pub mod dispatch;
pub mod registry;

pub use confirm::{AutoApprovePolicy, ConfirmationGate, ConfirmationInfo};
pub use dispatch::{ToolDispatcher, TOOL_INTERRUPT_MESSAGE};
pub use registry::ToolRegistry;
