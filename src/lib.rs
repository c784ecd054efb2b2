//! Agent Lifecycle Core
//!
//! The coupled subsystems that supervise a dynamic tree of agents under
//! depth/fanout/budget invariants (Kaala), wrap each agent's turn loop with
//! error classification, retry, context recovery and graceful degradation
//! (Autonomy), and mine recurring tool-call sequences across past sessions
//! into parameterized, Thompson-sampled procedures (Vidhi).
//!
//! This crate calls no model, reads no file, and opens no socket itself —
//! it consumes an abstract `Provider`, `ToolRunner`, and `Store`, and emits
//! structured events over an `EventBus`.

pub mod autonomy;
pub mod error;
pub mod event_bus;
pub mod kaala;
pub mod provider;
pub mod store;
pub mod time;
pub mod vidhi;

pub use autonomy::{AutonomyWrapper, WrapperConfig};
pub use error::{LifecycleError, LifecycleResult};
pub use event_bus::{EventBus, LifecycleEvent};
pub use kaala::{Kaala, KaalaConfig};
pub use provider::{
    CancelHandle, CompletionOptions, CompletionResult, CompletionUsage, InputHost, InputRequest,
    InputResolution, Provider, StopReason, ToolContext, ToolExecutionOutcome, ToolRunner,
};
pub use store::{SessionSource, Store};
pub use time::TimeSource;
pub use vidhi::VidhiEngine;
