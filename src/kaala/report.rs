//! Return-value shapes for Kaala's public operations.
//!
//! The spec names these operations (`canSpawn`, `killAgent`, `healTree`,
//! `getTreeHealth`) but leaves their exact return shape to the implementer
//! for anything beyond the bit-exact `KillResult` fields in spec.md §4.4
//! scenario 1. `BudgetStatus` in `orchestrator::budget.rs` is the template
//! for a small serializable status snapshot, which `TreeHealthReport`/
//! `AgentHealthReport` follow here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::heartbeat::{AgentId, AgentStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanSpawn {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl CanSpawn {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillResult {
    pub success: bool,
    pub killed_ids: Vec<AgentId>,
    pub cascade_count: usize,
    pub freed_tokens: u64,
    pub reason: Option<String>,
}

impl KillResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            killed_ids: Vec::new(),
            cascade_count: 0,
            freed_tokens: 0,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealReport {
    pub reaped_count: usize,
    pub killed_stale_count: usize,
    pub orphans_handled: usize,
    pub over_budget_killed: usize,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealthReport {
    pub agent_id: AgentId,
    pub status: AgentStatus,
    pub depth: u32,
    pub turn_count: u32,
    pub token_usage: u64,
    pub token_budget: u64,
    pub utilization: f64,
    pub ms_since_last_beat: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TreeHealthReport {
    pub total_agents: usize,
    pub alive_count: usize,
    pub stale_count: usize,
    pub dead_count: usize,
    pub killed_count: usize,
    pub completed_count: usize,
    pub error_count: usize,
    pub deepest_alive_depth: u32,
    pub agents_near_budget_exhaustion: Vec<AgentId>,
}
