//! The agent message list `AutonomyWrapper` snapshots and compacts.
//!
//! Grounded in the teacher's `memory::episodic::ConversationTurn`/`Role`
//! shape, extended with explicit tool-call/tool-result linkage (an `id` on
//! calls, a `call_id` on results) so `recoverContext`'s structural-recovery
//! path (spec.md §4.3: "drop any tool-call message that has no matching
//! tool-result message and vice versa") can be expressed without scanning
//! free-form content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MessageContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_call")]
    ToolCall { id: String, name: String, arguments: Value },
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        content: Value,
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl AgentMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: MessageContent::Text { text: text.into() },
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text { text: text.into() },
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text { text: text.into() },
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: Value, is_error: bool) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::ToolResult {
                call_id: call_id.into(),
                content,
                is_error,
            },
        }
    }

    /// Rough token estimate (chars / 4), used only for compaction-tier
    /// decisions — no tokenizer dependency is warranted at this scale.
    pub fn estimate_tokens(&self) -> usize {
        let len = match &self.content {
            MessageContent::Text { text } => text.len(),
            MessageContent::ToolCall { arguments, .. } => arguments.to_string().len(),
            MessageContent::ToolResult { content, .. } => content.to_string().len(),
        };
        (len / 4).max(1)
    }
}

pub fn estimate_total_tokens(messages: &[AgentMessage]) -> usize {
    messages.iter().map(AgentMessage::estimate_tokens).sum()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub messages: Vec<AgentMessage>,
}
