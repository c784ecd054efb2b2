//! Kaala configuration (spec.md §4.4).
//!
//! Follows the teacher's `AgentConfig`/`AgencyProfile` convention of a plain
//! struct with a `Default` impl and `with_*` builder methods rather than a
//! derive-heavy config crate.

use serde::{Deserialize, Serialize};

use super::heartbeat::{SYSTEM_MAX_DEPTH, SYSTEM_MAX_SUBS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    Cascade,
    Reparent,
    Promote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KaalaConfig {
    pub heartbeat_interval_ms: u64,
    pub stale_threshold_ms: i64,
    pub dead_threshold_ms: i64,
    pub global_max_agents: u32,
    pub budget_decay_factor: f64,
    pub root_token_budget: u64,
    pub orphan_policy: OrphanPolicy,
    pub max_agent_depth: u32,
    pub max_sub_agents: u32,
    pub min_token_budget_for_spawn: u64,
}

impl Default for KaalaConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            stale_threshold_ms: 30_000,
            dead_threshold_ms: 120_000,
            global_max_agents: 16,
            budget_decay_factor: 0.7,
            root_token_budget: 200_000,
            orphan_policy: OrphanPolicy::Cascade,
            max_agent_depth: SYSTEM_MAX_DEPTH,
            max_sub_agents: SYSTEM_MAX_SUBS,
            min_token_budget_for_spawn: 1_000,
        }
    }
}

impl KaalaConfig {
    /// Depth and fanout ceilings are clamped to the system maxima
    /// regardless of what the caller configured (spec.md invariants 3, 4).
    pub fn effective_max_depth(&self) -> u32 {
        self.max_agent_depth.min(SYSTEM_MAX_DEPTH)
    }

    pub fn effective_max_subs(&self) -> u32 {
        self.max_sub_agents.min(SYSTEM_MAX_SUBS)
    }

    pub fn with_max_agent_depth(mut self, depth: u32) -> Self {
        self.max_agent_depth = depth;
        self
    }

    pub fn with_max_sub_agents(mut self, subs: u32) -> Self {
        self.max_sub_agents = subs;
        self
    }

    pub fn with_root_token_budget(mut self, budget: u64) -> Self {
        self.root_token_budget = budget;
        self
    }

    pub fn with_budget_decay_factor(mut self, factor: f64) -> Self {
        self.budget_decay_factor = factor;
        self
    }

    pub fn with_min_token_budget_for_spawn(mut self, min: u64) -> Self {
        self.min_token_budget_for_spawn = min;
        self
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    pub fn with_stale_threshold_ms(mut self, ms: i64) -> Self {
        self.stale_threshold_ms = ms;
        self
    }

    pub fn with_dead_threshold_ms(mut self, ms: i64) -> Self {
        self.dead_threshold_ms = ms;
        self
    }

    pub fn with_global_max_agents(mut self, max: u32) -> Self {
        self.global_max_agents = max;
        self
    }
}
