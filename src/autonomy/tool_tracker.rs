//! ToolTracker (C3) — per-tool failure counter with disable/re-enable
//! (spec.md §3 "Tool failure tracker", §4.3 state machine).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFailureState {
    pub consecutive_failures: u32,
    pub total_failures: u32,
    pub disabled: bool,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl Default for ToolFailureState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            total_failures: 0,
            disabled: false,
            disabled_at: None,
        }
    }
}

/// Outcome of a single `record_tool_outcome` call, so the caller can decide
/// whether to emit `autonomy:tool_disabled`/`autonomy:tool_reenabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolTransition {
    None,
    Disabled,
    Reenabled,
}

pub struct ToolTracker {
    states: HashMap<String, ToolFailureState>,
    disable_threshold: u32,
}

impl ToolTracker {
    pub fn new(disable_threshold: u32) -> Self {
        Self {
            states: HashMap::new(),
            disable_threshold,
        }
    }

    pub fn is_disabled(&self, tool: &str) -> bool {
        self.states.get(tool).map(|s| s.disabled).unwrap_or(false)
    }

    pub fn state(&self, tool: &str) -> Option<&ToolFailureState> {
        self.states.get(tool)
    }

    /// Records a tool outcome and returns the transition, if any. Invariant
    /// preserved at every step: `disabled ⇒ consecutive_failures ≥
    /// disable_threshold` at the moment of the Disabled transition.
    pub fn record_outcome(&mut self, tool: &str, success: bool, now: DateTime<Utc>) -> ToolTransition {
        let state = self.states.entry(tool.to_string()).or_default();

        if success {
            if state.disabled {
                state.disabled = false;
                state.disabled_at = None;
                state.consecutive_failures = 0;
                return ToolTransition::Reenabled;
            }
            state.consecutive_failures = 0;
            return ToolTransition::None;
        }

        state.consecutive_failures += 1;
        state.total_failures += 1;
        if !state.disabled && state.consecutive_failures >= self.disable_threshold {
            state.disabled = true;
            state.disabled_at = Some(now);
            return ToolTransition::Disabled;
        }
        ToolTransition::None
    }
}
