//! Autonomy — per-turn error classification, retry, compaction, tool
//! tracking, and graceful degradation (spec.md components C1-C5).

pub mod classifier;
pub mod compactor;
pub mod message;
pub mod metrics;
pub mod retry;
pub mod tool_tracker;
pub mod wrapper;

pub use classifier::{Classification, ErrorClassifier, ErrorKind};
pub use compactor::{CompactionTier, CompactorConfig};
pub use message::{AgentMessage, AgentState, MessageContent, MessageRole};
pub use metrics::{HealthThresholds, TurnMetric, TurnMetricsRing};
pub use retry::RetryConfig;
pub use tool_tracker::{ToolFailureState, ToolTracker, ToolTransition};
pub use wrapper::{AutonomyWrapper, DegradationReason, HealthReport, WrapperConfig};
