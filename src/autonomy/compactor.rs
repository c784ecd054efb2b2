//! ContextCompactor (C4) — spec.md §4.3 "afterTurn" compaction tiers.
//!
//! Grounded loosely in the teacher's `memory::compactor::ContextCompactor`,
//! which keeps the first message and the last few turns and summarizes the
//! middle via a model call. This crate's Non-goals forbid calling a model
//! directly (§1), so compaction here is purely structural: tool results are
//! truncated first, then older assistant prose is dropped, then older user
//! turns — the system prompt and the current (final) user request are never
//! touched, matching spec.md's ordering exactly.

use serde::{Deserialize, Serialize};

use super::message::{estimate_total_tokens, AgentMessage, MessageContent, MessageRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionTier {
    None,
    Gentle,
    Moderate,
    Aggressive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompactorConfig {
    pub gentle_utilization: f64,
    pub moderate_utilization: f64,
    pub aggressive_utilization: f64,
    pub keep_recent_tool_results: usize,
    pub keep_recent_assistant_text: usize,
    pub keep_recent_user_turns: usize,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            gentle_utilization: 0.7,
            moderate_utilization: 0.85,
            aggressive_utilization: 0.95,
            keep_recent_tool_results: 3,
            keep_recent_assistant_text: 3,
            keep_recent_user_turns: 1,
        }
    }
}

pub struct CompactionOutcome {
    pub tier: CompactionTier,
    pub messages: Vec<AgentMessage>,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

fn decide_tier(utilization: f64, config: &CompactorConfig) -> CompactionTier {
    if utilization >= config.aggressive_utilization {
        CompactionTier::Aggressive
    } else if utilization >= config.moderate_utilization {
        CompactionTier::Moderate
    } else if utilization >= config.gentle_utilization {
        CompactionTier::Gentle
    } else {
        CompactionTier::None
    }
}

const TRUNCATED_PLACEHOLDER: &str = "[older tool result truncated]";

pub fn compact_if_needed(messages: &[AgentMessage], ctx_limit: usize, config: &CompactorConfig) -> CompactionOutcome {
    let tokens_before = estimate_total_tokens(messages);
    let utilization = if ctx_limit == 0 {
        1.0
    } else {
        tokens_before as f64 / ctx_limit as f64
    };
    let tier = decide_tier(utilization, config);

    if tier == CompactionTier::None {
        return CompactionOutcome {
            tier,
            messages: messages.to_vec(),
            tokens_before,
            tokens_after: tokens_before,
        };
    }

    let last_index = messages.len().saturating_sub(1);
    let is_protected = |i: usize, role: MessageRole| i == 0 && role == MessageRole::System || i == last_index;

    let tool_result_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(i, m)| !is_protected(*i, m.role) && matches!(m.content, MessageContent::ToolResult { .. }))
        .map(|(i, _)| i)
        .collect();
    let truncate_upto = tool_result_indices.len().saturating_sub(config.keep_recent_tool_results);
    let truncate_set: std::collections::HashSet<usize> = tool_result_indices[..truncate_upto].iter().copied().collect();

    let mut drop_set: std::collections::HashSet<usize> = std::collections::HashSet::new();

    if matches!(tier, CompactionTier::Moderate | CompactionTier::Aggressive) {
        let assistant_text_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(i, m)| {
                !is_protected(*i, m.role) && m.role == MessageRole::Assistant && matches!(m.content, MessageContent::Text { .. })
            })
            .map(|(i, _)| i)
            .collect();
        let drop_upto = assistant_text_indices.len().saturating_sub(config.keep_recent_assistant_text);
        drop_set.extend(&assistant_text_indices[..drop_upto]);
    }

    if tier == CompactionTier::Aggressive {
        let user_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(i, m)| !is_protected(*i, m.role) && m.role == MessageRole::User)
            .map(|(i, _)| i)
            .collect();
        let drop_upto = user_indices.len().saturating_sub(config.keep_recent_user_turns);
        drop_set.extend(&user_indices[..drop_upto]);
    }

    let mut new_messages = Vec::with_capacity(messages.len());
    for (i, message) in messages.iter().enumerate() {
        if drop_set.contains(&i) {
            continue;
        }
        if truncate_set.contains(&i) {
            if let MessageContent::ToolResult { call_id, is_error, .. } = &message.content {
                new_messages.push(AgentMessage::tool_result(
                    call_id.clone(),
                    serde_json::Value::String(TRUNCATED_PLACEHOLDER.to_string()),
                    *is_error,
                ));
                continue;
            }
        }
        new_messages.push(message.clone());
    }

    let tokens_after = estimate_total_tokens(&new_messages);

    CompactionOutcome {
        tier,
        messages: new_messages,
        tokens_before,
        tokens_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build_messages(tool_results: usize) -> Vec<AgentMessage> {
        let mut messages = vec![AgentMessage::system("you are an agent")];
        for i in 0..tool_results {
            messages.push(AgentMessage::tool_call(format!("c{i}"), "read", json!({"path": "x"})));
            messages.push(AgentMessage::tool_result(format!("c{i}"), json!({"content": "a".repeat(200)}), false));
        }
        messages.push(AgentMessage::user("current request"));
        messages
    }

    #[test]
    fn below_threshold_is_untouched() {
        let messages = build_messages(2);
        let config = CompactorConfig::default();
        let outcome = compact_if_needed(&messages, 1_000_000, &config);
        assert_eq!(outcome.tier, CompactionTier::None);
        assert_eq!(outcome.messages.len(), messages.len());
    }

    #[test]
    fn gentle_truncates_oldest_tool_results_only() {
        let messages = build_messages(10);
        let config = CompactorConfig::default();
        let tokens = estimate_total_tokens(&messages);
        let outcome = compact_if_needed(&messages, (tokens as f64 / 0.75) as usize, &config);
        assert_eq!(outcome.tier, CompactionTier::Gentle);
        assert!(outcome.tokens_after < outcome.tokens_before);
        assert_eq!(outcome.messages.len(), messages.len());
        assert!(matches!(&outcome.messages[1].content, MessageContent::ToolCall { .. }));
    }

    #[test]
    fn protected_messages_survive_aggressive_tier() {
        let messages = build_messages(10);
        let config = CompactorConfig::default();
        let tokens = estimate_total_tokens(&messages);
        let outcome = compact_if_needed(&messages, (tokens as f64 / 0.99) as usize, &config);
        assert_eq!(outcome.tier, CompactionTier::Aggressive);
        assert!(matches!(outcome.messages.first().unwrap().role, MessageRole::System));
        assert!(matches!(outcome.messages.last().unwrap().role, MessageRole::User));
    }
}
