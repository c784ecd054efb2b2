//! AutonomyWrapper (C5) — spec.md §4.3, the per-turn wrapper around one
//! agent's turn loop.
//!
//! One `AutonomyWrapper` owns exactly one agent's mutable turn state,
//! matching spec.md §5's "single logical mutator owns the AutonomyWrapper
//! per agent; turns for one agent are strictly sequential." Internal state
//! is guarded by `tokio::sync::Mutex` rather than `std::sync::Mutex` since
//! hooks are called from async contexts and may be held across awaits in
//! `with_retry`.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::event_bus::{EventBus, LifecycleEvent};
use crate::provider::CancelHandle;
use crate::time::{SystemTimeSource, TimeSource};

use super::classifier::Classification;
use super::compactor::{compact_if_needed, CompactionTier, CompactorConfig};
use super::message::{estimate_total_tokens, AgentMessage, AgentState, MessageContent};
use super::metrics::{HealthThresholds, TurnMetric, TurnMetricsRing};
use super::retry::{with_retry, RetryConfig, RetryEvent};
use super::tool_tracker::{ToolTracker, ToolTransition};

/// SPEC_FULL.md §4.3 supplement: typed degradation reasons, with a
/// `Custom` escape hatch so callers aren't forced into the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DegradationReason {
    RepeatedToolFailure,
    ContextCorrupt,
    HighErrorRate,
    Custom(String),
}

impl std::fmt::Display for DegradationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradationReason::RepeatedToolFailure => write!(f, "repeated_tool_failure"),
            DegradationReason::ContextCorrupt => write!(f, "context_corrupt"),
            DegradationReason::HighErrorRate => write!(f, "high_error_rate"),
            DegradationReason::Custom(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for DegradationReason {
    fn from(value: &str) -> Self {
        match value {
            "repeated_tool_failure" => DegradationReason::RepeatedToolFailure,
            "context_corrupt" => DegradationReason::ContextCorrupt,
            "high_error_rate" => DegradationReason::HighErrorRate,
            other => DegradationReason::Custom(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub utilization: f64,
    pub degraded: bool,
    pub degraded_reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WrapperConfig {
    pub health: HealthThresholds,
    pub compactor: CompactorConfig,
    pub retry: RetryConfigMirror,
    pub tool_disable_threshold: u32,
    pub context_limit: usize,
}

/// `RetryConfig` has no `Serialize`/`Deserialize` (it borrows nothing, but
/// keeping `WrapperConfig` serializable end to end is simplest with a
/// field-for-field mirror).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfigMirror {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub unknown_retry_cap: u32,
}

impl From<RetryConfigMirror> for RetryConfig {
    fn from(m: RetryConfigMirror) -> Self {
        RetryConfig {
            max_retries: m.max_retries,
            base_delay_ms: m.base_delay_ms,
            max_delay_ms: m.max_delay_ms,
            unknown_retry_cap: m.unknown_retry_cap,
        }
    }
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            health: HealthThresholds::default(),
            compactor: CompactorConfig::default(),
            retry: RetryConfigMirror {
                max_retries: 3,
                base_delay_ms: 250,
                max_delay_ms: 10_000,
                unknown_retry_cap: 2,
            },
            tool_disable_threshold: 5,
            context_limit: 128_000,
        }
    }
}

struct Inner {
    agent_id: String,
    config: WrapperConfig,
    metrics: Mutex<TurnMetricsRing>,
    tool_tracker: Mutex<ToolTracker>,
    last_good_messages: Mutex<Option<Vec<AgentMessage>>>,
    degraded_reasons: Mutex<HashSet<DegradationReason>>,
}

pub struct AutonomyWrapper {
    inner: Arc<Inner>,
    events: Arc<EventBus>,
    time: Arc<dyn TimeSource>,
}

impl AutonomyWrapper {
    pub fn new(agent_id: impl Into<String>, config: WrapperConfig, events: Arc<EventBus>) -> Self {
        Self::with_time_source(agent_id, config, events, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(
        agent_id: impl Into<String>,
        config: WrapperConfig,
        events: Arc<EventBus>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let threshold = config.tool_disable_threshold;
        Self {
            inner: Arc::new(Inner {
                agent_id: agent_id.into(),
                config,
                metrics: Mutex::new(TurnMetricsRing::new()),
                tool_tracker: Mutex::new(ToolTracker::new(threshold)),
                last_good_messages: Mutex::new(None),
                degraded_reasons: Mutex::new(HashSet::new()),
            }),
            events,
            time,
        }
    }

    /// Snapshots `state.messages` as the last-known-good list before the
    /// turn runs.
    pub async fn before_turn(&self, state: &AgentState) {
        *self.inner.last_good_messages.lock().await = Some(state.messages.clone());
    }

    /// Consults the compactor and, if it chose a tier, updates the
    /// last-known-good snapshot and emits `autonomy:compaction`.
    pub async fn after_turn(&self, state: AgentState) -> AgentState {
        let outcome = compact_if_needed(&state.messages, self.inner.config.context_limit, &self.inner.config.compactor);

        if outcome.tier != CompactionTier::None {
            self.events.emit(LifecycleEvent::AutonomyCompaction {
                agent_id: self.inner.agent_id.clone(),
                tier: format!("{:?}", outcome.tier).to_lowercase(),
                before_tokens: outcome.tokens_before,
                after_tokens: outcome.tokens_after,
            });
            *self.inner.last_good_messages.lock().await = Some(outcome.messages.clone());
        }

        AgentState {
            messages: outcome.messages,
        }
    }

    pub async fn record_turn_metrics(&self, metric: TurnMetric) {
        let current_tokens = metric.tokens_after;
        let mut ring = self.inner.metrics.lock().await;
        ring.push(metric);
        let error_rate = ring.error_rate();
        let average_latency_ms = ring.average_latency_ms();
        drop(ring);

        if error_rate > self.inner.config.health.error_rate_warning_threshold {
            self.events.emit(LifecycleEvent::AutonomyHealthWarning {
                agent_id: self.inner.agent_id.clone(),
                reason: format!("error rate {error_rate:.2} exceeds threshold"),
            });
        }
        if average_latency_ms > self.inner.config.health.latency_warning_ms as f64 {
            self.events.emit(LifecycleEvent::AutonomyHealthWarning {
                agent_id: self.inner.agent_id.clone(),
                reason: format!("average latency {average_latency_ms:.0}ms exceeds threshold"),
            });
        }
        let utilization = current_tokens as f64 / self.inner.config.context_limit.max(1) as f64;
        if utilization >= self.inner.config.compactor.aggressive_utilization {
            self.events.emit(LifecycleEvent::AutonomyHealthWarning {
                agent_id: self.inner.agent_id.clone(),
                reason: format!("context utilization {utilization:.2} near exhaustion"),
            });
        }
    }

    pub async fn on_tool_start(&self, _tool: &str) {}

    /// Records a tool outcome; emits the disable/re-enable event on state
    /// transitions.
    pub async fn on_tool_used(&self, tool: &str, success: bool) {
        let now = self.time.now_utc();
        let transition = self.inner.tool_tracker.lock().await.record_outcome(tool, success, now);
        match transition {
            ToolTransition::Disabled => self.events.emit(LifecycleEvent::AutonomyToolDisabled {
                agent_id: self.inner.agent_id.clone(),
                tool: tool.to_string(),
            }),
            ToolTransition::Reenabled => self.events.emit(LifecycleEvent::AutonomyToolReenabled {
                agent_id: self.inner.agent_id.clone(),
                tool: tool.to_string(),
            }),
            ToolTransition::None => {}
        }
    }

    pub async fn is_tool_disabled(&self, tool: &str) -> bool {
        self.inner.tool_tracker.lock().await.is_disabled(tool)
    }

    /// Runs `op` with classification-driven retry, emitting
    /// `autonomy:error_classified`/`autonomy:retry` for each step. Uses an
    /// internally-owned `CancelHandle` that never fires; callers who need to
    /// cancel an in-flight retry should use `with_retry_cancellable`.
    pub async fn with_retry<Op, Fut, T>(&self, op: Op) -> Result<T, Classification>
    where
        Op: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, String>>,
    {
        self.with_retry_cancellable(op, &CancelHandle::new()).await
    }

    /// Like `with_retry`, but checks `cancel` before each attempt and during
    /// the backoff sleep, short-circuiting to a fatal `cancelled`
    /// classification (spec.md §5).
    pub async fn with_retry_cancellable<Op, Fut, T>(&self, op: Op, cancel: &CancelHandle) -> Result<T, Classification>
    where
        Op: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, String>>,
    {
        let agent_id = self.inner.agent_id.clone();
        let events = self.events.clone();
        let config: RetryConfig = self.inner.config.retry.into();

        with_retry(
            op,
            config,
            |delay_ms| tokio::time::sleep(std::time::Duration::from_millis(delay_ms)),
            move |event| match event {
                RetryEvent::ErrorClassified { classification, .. } => {
                    events.emit(LifecycleEvent::AutonomyErrorClassified {
                        agent_id: agent_id.clone(),
                        kind: format!("{:?}", classification.kind).to_lowercase(),
                        retryable: classification.retryable,
                    });
                }
                RetryEvent::Retrying { attempt, delay_ms } => {
                    events.emit(LifecycleEvent::AutonomyRetry {
                        agent_id: agent_id.clone(),
                        attempt,
                        delay_ms,
                    });
                }
            },
            cancel,
        )
        .await
    }

    /// Restores `last_good_messages` if present; otherwise attempts
    /// structural recovery (drop unmatched tool-call/tool-result pairs).
    pub async fn recover_context(&self, state: AgentState) -> AgentState {
        let last_good = self.inner.last_good_messages.lock().await.clone();
        if let Some(messages) = last_good.filter(|m| !m.is_empty()) {
            self.events.emit(LifecycleEvent::AutonomyContextRecovered {
                agent_id: self.inner.agent_id.clone(),
                method: "last_good".to_string(),
                original_len: state.messages.len(),
                recovered_len: messages.len(),
            });
            return AgentState { messages };
        }

        let recovered = structural_recovery(&state.messages);
        if recovered.len() != state.messages.len() {
            self.events.emit(LifecycleEvent::AutonomyContextRecovered {
                agent_id: self.inner.agent_id.clone(),
                method: "structural".to_string(),
                original_len: state.messages.len(),
                recovered_len: recovered.len(),
            });
            return AgentState { messages: recovered };
        }

        state
    }

    pub async fn get_health_report(&self, state: &AgentState) -> HealthReport {
        let ring = self.inner.metrics.lock().await;
        let error_rate = ring.error_rate();
        let average_latency_ms = ring.average_latency_ms();
        drop(ring);

        let utilization = estimate_total_tokens(&state.messages) as f64 / self.inner.config.context_limit.max(1) as f64;

        let reasons = self.inner.degraded_reasons.lock().await;
        HealthReport {
            error_rate,
            average_latency_ms,
            utilization,
            degraded: !reasons.is_empty(),
            degraded_reasons: reasons.iter().map(ToString::to_string).collect(),
        }
    }

    /// Idempotent: adding an already-present reason leaves the set
    /// unchanged (spec.md §8 round-trip property).
    pub async fn enter_degraded_mode(&self, reason: impl Into<DegradationReason>) {
        let reason = reason.into();
        let mut reasons = self.inner.degraded_reasons.lock().await;
        let inserted = reasons.insert(reason.clone());
        if inserted {
            self.events.emit(LifecycleEvent::AutonomyDegraded {
                agent_id: self.inner.agent_id.clone(),
                degraded: true,
                reason: reason.to_string(),
            });
        }
    }

    pub async fn exit_degraded_mode(&self, reason: impl Into<DegradationReason>) {
        let reason = reason.into();
        let mut reasons = self.inner.degraded_reasons.lock().await;
        reasons.remove(&reason);
        let degraded = !reasons.is_empty();
        drop(reasons);
        self.events.emit(LifecycleEvent::AutonomyDegraded {
            agent_id: self.inner.agent_id.clone(),
            degraded,
            reason: reason.to_string(),
        });
    }
}

fn structural_recovery(messages: &[AgentMessage]) -> Vec<AgentMessage> {
    let call_ids: HashSet<&str> = messages
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::ToolCall { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    let result_call_ids: HashSet<&str> = messages
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();

    messages
        .iter()
        .filter(|m| match &m.content {
            MessageContent::ToolCall { id, .. } => result_call_ids.contains(id.as_str()),
            MessageContent::ToolResult { call_id, .. } => call_ids.contains(call_id.as_str()),
            MessageContent::Text { .. } => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrapper() -> AutonomyWrapper {
        AutonomyWrapper::new("agent-1", WrapperConfig::default(), Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn before_turn_snapshots_messages() {
        let wrapper = wrapper();
        let state = AgentState {
            messages: vec![AgentMessage::user("hi")],
        };
        wrapper.before_turn(&state).await;
        assert_eq!(wrapper.inner.last_good_messages.lock().await.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tool_disable_then_reenable_emits_events() {
        let wrapper = AutonomyWrapper::new(
            "agent-1",
            WrapperConfig {
                tool_disable_threshold: 5,
                ..WrapperConfig::default()
            },
            Arc::new(EventBus::new()),
        );
        for _ in 0..5 {
            wrapper.on_tool_used("bash", false).await;
        }
        assert!(wrapper.is_tool_disabled("bash").await);

        wrapper.on_tool_used("bash", true).await;
        assert!(!wrapper.is_tool_disabled("bash").await);
    }

    #[tokio::test]
    async fn degraded_mode_is_idempotent() {
        let wrapper = wrapper();
        wrapper.enter_degraded_mode(DegradationReason::HighErrorRate).await;
        wrapper.enter_degraded_mode(DegradationReason::HighErrorRate).await;
        let report = wrapper.get_health_report(&AgentState::default()).await;
        assert_eq!(report.degraded_reasons.len(), 1);
    }

    #[tokio::test]
    async fn health_report_utilization_reflects_message_tokens() {
        let wrapper = AutonomyWrapper::new(
            "agent-1",
            WrapperConfig {
                context_limit: 100,
                ..WrapperConfig::default()
            },
            Arc::new(EventBus::new()),
        );
        let state = AgentState {
            messages: vec![AgentMessage::user("x".repeat(400))],
        };
        let report = wrapper.get_health_report(&state).await;
        assert!(report.utilization > 0.9);
    }

    #[tokio::test]
    async fn recover_context_prefers_last_good() {
        let wrapper = wrapper();
        let good_state = AgentState {
            messages: vec![AgentMessage::user("hi")],
        };
        wrapper.before_turn(&good_state).await;

        let corrupted = AgentState {
            messages: vec![AgentMessage::user("hi"), AgentMessage::user("garbage")],
        };
        let recovered = wrapper.recover_context(corrupted).await;
        assert_eq!(recovered.messages.len(), 1);
    }

    #[tokio::test]
    async fn structural_recovery_drops_unmatched_tool_messages() {
        let wrapper = wrapper();
        let state = AgentState {
            messages: vec![
                AgentMessage::user("do it"),
                AgentMessage::tool_call("c1", "read", json!({})),
                AgentMessage::tool_result("c1", json!("ok"), false),
                AgentMessage::tool_call("c2", "read", json!({})),
            ],
        };
        let recovered = wrapper.recover_context(state).await;
        assert_eq!(recovered.messages.len(), 3);
    }
}
