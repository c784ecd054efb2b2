//! External capabilities consumed, never implemented, by this crate
//! (spec.md §6): `Provider` (model calls), `ToolRunner` (tool execution),
//! and the input-request protocol Autonomy uses to ask the host for
//! missing information.
//!
//! Trait shapes follow the teacher's `agent::provider::LLMProvider` and
//! `tools::Tool` (`#[async_trait]`, `Send + Sync`), generalized to the
//! richer `{messages, usage, cost, stopReason}` result spec.md names
//! instead of the teacher's bare `String` completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::autonomy::message::AgentState;

/// Cooperative cancellation handle threaded through long-running operations
/// (spec.md §5 "Cancellation & timeouts").
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub messages: Vec<crate::autonomy::message::AgentMessage>,
    pub usage: CompletionUsage,
    pub cost: f64,
    pub stop_reason: StopReason,
}

/// The abstract model-call capability. Failures are plain `String`s — they
/// flow straight into `ErrorClassifier::classify`, which maps them
/// deterministically to the transient/fatal/unknown taxonomy (spec.md §6).
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(
        &self,
        state: &AgentState,
        options: &CompletionOptions,
        cancel: &CancelHandle,
    ) -> Result<CompletionResult, String>;
}

#[derive(Debug, Clone)]
pub struct ToolExecutionOutcome {
    pub content: Value,
    pub is_error: bool,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub agent_id: String,
    pub cancel: CancelHandle,
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolExecutionOutcome, String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRequest {
    pub request_id: String,
    pub agent_id: String,
    pub prompt: String,
    pub choices: Option<Vec<String>>,
    pub default_value: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputResolution {
    pub request_id: String,
    pub value: Option<String>,
    pub denied: bool,
    pub deny_reason: Option<String>,
}

#[async_trait]
pub trait InputHost: Send + Sync {
    async fn request_input(&self, request: InputRequest) -> InputResolution;
}

/// Applies spec.md §6's timeout contract on top of a host that may never
/// resolve on its own: "Timeout without default → failure; with default →
/// resolve to default." No sub-agent input request may block indefinitely.
pub async fn request_input_with_timeout(host: &dyn InputHost, request: InputRequest) -> Result<InputResolution, String> {
    let timeout_ms = request.timeout_ms;
    let default_value = request.default_value.clone();
    let request_id = request.request_id.clone();

    let call = host.request_input(request);
    let resolution = match timeout_ms {
        Some(ms) => tokio::time::timeout(std::time::Duration::from_millis(ms), call).await,
        None => Ok(call.await),
    };

    match resolution {
        Ok(resolution) => Ok(resolution),
        Err(_) => match default_value {
            Some(value) => Ok(InputResolution {
                request_id,
                value: Some(value),
                denied: false,
                deny_reason: None,
            }),
            None => Err("input request timed out".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverRespondingHost;

    #[async_trait]
    impl InputHost for NeverRespondingHost {
        async fn request_input(&self, _request: InputRequest) -> InputResolution {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn timeout_without_default_fails() {
        let request = InputRequest {
            request_id: "r1".into(),
            agent_id: "a1".into(),
            prompt: "pick one".into(),
            choices: None,
            default_value: None,
            timeout_ms: Some(10),
        };
        let result = request_input_with_timeout(&NeverRespondingHost, request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn timeout_with_default_resolves_to_default() {
        let request = InputRequest {
            request_id: "r1".into(),
            agent_id: "a1".into(),
            prompt: "pick one".into(),
            choices: None,
            default_value: Some("fallback".into()),
            timeout_ms: Some(10),
        };
        let result = request_input_with_timeout(&NeverRespondingHost, request).await.unwrap();
        assert_eq!(result.value, Some("fallback".to_string()));
    }
}
