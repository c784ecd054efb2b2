//! Kaala's view of an agent: the heartbeat record and its status machine.
//!
//! Grounded in `orchestrator::budget::AutonomyLedger` (token/budget tracking
//! shape) and the retrieved `ThirdKeyAI-Symbiont` lifecycle controller
//! (arena-of-records-by-id pattern, status transitions logged through
//! `tracing`). Kaala never holds a direct reference to another agent; every
//! traversal goes through the heartbeat map by id (design note §9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AgentId = String;

pub const SYSTEM_MAX_DEPTH: u32 = 10;
pub const SYSTEM_MAX_SUBS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Alive,
    Stale,
    Dead,
    Killed,
    Completed,
    Error,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Killed | AgentStatus::Completed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Alive => "alive",
            AgentStatus::Stale => "stale",
            AgentStatus::Dead => "dead",
            AgentStatus::Killed => "killed",
            AgentStatus::Completed => "completed",
            AgentStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: AgentId,
    pub parent_id: Option<AgentId>,
    pub depth: u32,
    pub purpose: String,
    pub started_at: DateTime<Utc>,
    pub last_beat: DateTime<Utc>,
    pub turn_count: u32,
    pub token_usage: u64,
    pub token_budget: u64,
    pub status: AgentStatus,
}

impl Heartbeat {
    pub fn new_root(agent_id: impl Into<AgentId>, purpose: impl Into<String>, token_budget: u64, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            parent_id: None,
            depth: 0,
            purpose: purpose.into(),
            started_at: now,
            last_beat: now,
            turn_count: 0,
            token_usage: 0,
            token_budget,
            status: AgentStatus::Alive,
        }
    }

    pub fn new_child(
        agent_id: impl Into<AgentId>,
        parent_id: impl Into<AgentId>,
        depth: u32,
        purpose: impl Into<String>,
        token_budget: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            parent_id: Some(parent_id.into()),
            depth,
            purpose: purpose.into(),
            started_at: now,
            last_beat: now,
            turn_count: 0,
            token_usage: 0,
            token_budget,
            status: AgentStatus::Alive,
        }
    }

    pub fn over_budget(&self) -> bool {
        self.token_usage > self.token_budget
    }

    pub fn remaining_budget(&self) -> u64 {
        self.token_budget.saturating_sub(self.token_usage)
    }
}
