//! Kaala — the Lifecycle Manager (C6).
//!
//! Grounded in the retrieved `ThirdKeyAI-Symbiont` `DefaultLifecycleController`
//! (arena `HashMap<AgentId, _>` behind a lock, background sweep task guarded
//! by a shutdown `Notify`, status transitions logged through `tracing`) and
//! in `orchestrator::healing::HealingEngine`'s periodic `tokio::time::interval`
//! diagnostic loop. Kaala never holds a direct pointer to another agent —
//! every traversal walks the heartbeat map by id (design note §9, "cyclic
//! parent/child pointers... store only agentId on each side").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

use crate::error::{LifecycleError, LifecycleResult};
use crate::event_bus::{EventBus, LifecycleEvent};
use crate::store::Store;
use crate::time::{SystemTimeSource, TimeSource};

use super::config::{KaalaConfig, OrphanPolicy};
use super::heartbeat::{AgentId, AgentStatus, Heartbeat};
use super::report::{AgentHealthReport, CanSpawn, HealReport, KillResult, TreeHealthReport};

/// Optional fields a `recordHeartbeat` call may update.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatUpdate {
    pub turn_count: Option<u32>,
    pub token_usage: Option<u64>,
    pub purpose: Option<String>,
}

/// Result shape for `healAgent`, matching §7's "returned as {success,reason},
/// never thrown" rule for invariant violations.
#[derive(Debug, Clone)]
pub struct HealResult {
    pub success: bool,
    pub reason: Option<String>,
}

impl HealResult {
    fn ok() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }
}

type StatusListener = Box<dyn Fn(&AgentId, AgentStatus, AgentStatus, Option<&AgentId>) + Send + Sync>;

struct Inner {
    agents: RwLock<HashMap<AgentId, Heartbeat>>,
    stuck_reasons: StdMutex<HashMap<AgentId, String>>,
    config: RwLock<KaalaConfig>,
    listeners: StdMutex<Vec<StatusListener>>,
    disposed: AtomicBool,
    monitor_shutdown: Notify,
    monitor_handle: StdMutex<Option<JoinHandle<()>>>,
}

pub struct Kaala {
    inner: Arc<Inner>,
    events: Arc<EventBus>,
    time: Arc<dyn TimeSource>,
    store: Arc<dyn Store>,
}

impl Kaala {
    pub fn new(config: KaalaConfig, events: Arc<EventBus>, store: Arc<dyn Store>) -> Self {
        Self::with_time_source(config, events, Arc::new(SystemTimeSource), store)
    }

    pub fn with_time_source(
        config: KaalaConfig,
        events: Arc<EventBus>,
        time: Arc<dyn TimeSource>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                agents: RwLock::new(HashMap::new()),
                stuck_reasons: StdMutex::new(HashMap::new()),
                config: RwLock::new(config),
                listeners: StdMutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
                monitor_shutdown: Notify::new(),
                monitor_handle: StdMutex::new(None),
            }),
            events,
            time,
            store,
        }
    }

    fn ensure_not_disposed(&self) -> LifecycleResult<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            Err(LifecycleError::Disposed)
        } else {
            Ok(())
        }
    }

    pub fn on_status_change<F>(&self, cb: F)
    where
        F: Fn(&AgentId, AgentStatus, AgentStatus, Option<&AgentId>) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().unwrap().push(Box::new(cb));
    }

    /// Internal setter: no-ops on no-change, refreshes `last_beat`, fires
    /// listeners wrapped in a catch-unwind isolation boundary, and emits the
    /// bus event.
    fn set_status(&self, agents: &mut HashMap<AgentId, Heartbeat>, id: &AgentId, new_status: AgentStatus, now: DateTime<Utc>) {
        let Some(hb) = agents.get_mut(id) else { return };
        let old_status = hb.status;
        if old_status == new_status {
            return;
        }
        hb.status = new_status;
        hb.last_beat = now;
        let parent_id = hb.parent_id.clone();

        let listeners = self.inner.listeners.lock().unwrap();
        for listener in listeners.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(id, old_status, new_status, parent_id.as_ref())
            }));
            if result.is_err() {
                tracing::warn!(agent_id = %id, "status-change listener panicked; ignoring");
            }
        }
        drop(listeners);

        self.events.emit(LifecycleEvent::KaalaStatusChange {
            agent_id: id.clone(),
            old_status,
            new_status,
            parent_id,
        });
    }

    pub async fn register_agent(&self, hb: Heartbeat) -> LifecycleResult<()> {
        self.ensure_not_disposed()?;
        let mut agents = self.inner.agents.write().await;
        if agents.contains_key(&hb.agent_id) {
            return Err(LifecycleError::InvariantViolation(format!(
                "agent {} already registered",
                hb.agent_id
            )));
        }
        tracing::info!(agent_id = %hb.agent_id, depth = hb.depth, "registering agent");
        agents.insert(hb.agent_id.clone(), hb.clone());
        drop(agents);
        self.store.upsert_heartbeat(&hb).await?;
        Ok(())
    }

    pub async fn record_heartbeat(&self, id: &str, update: Option<HeartbeatUpdate>) -> LifecycleResult<()> {
        self.ensure_not_disposed()?;
        let now = self.time.now_utc();
        let mut agents = self.inner.agents.write().await;
        let hb = agents
            .get_mut(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        if let Some(update) = update {
            if let Some(tc) = update.turn_count {
                hb.turn_count = tc;
            }
            if let Some(tu) = update.token_usage {
                hb.token_usage = tu;
            }
            if let Some(purpose) = update.purpose {
                hb.purpose = purpose;
            }
        }
        hb.last_beat = now;

        if hb.status == AgentStatus::Stale {
            self.set_status(&mut agents, &id.to_string(), AgentStatus::Alive, now);
        }
        let persisted = agents.get(id).cloned();
        drop(agents);
        if let Some(hb) = persisted {
            self.store.upsert_heartbeat(&hb).await?;
        }
        Ok(())
    }

    pub async fn mark_completed(&self, id: &str) -> LifecycleResult<()> {
        self.ensure_not_disposed()?;
        let now = self.time.now_utc();
        let mut agents = self.inner.agents.write().await;
        if !agents.contains_key(id) {
            return Err(LifecycleError::NotFound(id.to_string()));
        }
        self.set_status(&mut agents, &id.to_string(), AgentStatus::Completed, now);
        let hb = agents.get(id).cloned();
        drop(agents);
        if let Some(hb) = hb {
            self.store.upsert_heartbeat(&hb).await?;
        }
        Ok(())
    }

    pub async fn mark_error(&self, id: &str) -> LifecycleResult<()> {
        self.ensure_not_disposed()?;
        let now = self.time.now_utc();
        let mut agents = self.inner.agents.write().await;
        if !agents.contains_key(id) {
            return Err(LifecycleError::NotFound(id.to_string()));
        }
        self.set_status(&mut agents, &id.to_string(), AgentStatus::Error, now);
        let hb = agents.get(id).cloned();
        drop(agents);
        if let Some(hb) = hb {
            self.store.upsert_heartbeat(&hb).await?;
        }
        Ok(())
    }

    /// Open question 1: if a reason is already recorded for this agent, it
    /// is kept; a fresh `reportStuck` call never overwrites a prior reason.
    pub async fn report_stuck(&self, id: &str, reason: Option<String>) -> LifecycleResult<()> {
        self.ensure_not_disposed()?;
        let agents = self.inner.agents.read().await;
        if !agents.contains_key(id) {
            return Err(LifecycleError::NotFound(id.to_string()));
        }
        drop(agents);

        let mut reasons = self.inner.stuck_reasons.lock().unwrap();
        reasons
            .entry(id.to_string())
            .or_insert_with(|| reason.unwrap_or_else(|| "unspecified".to_string()));
        Ok(())
    }

    fn is_ancestor(agents: &HashMap<AgentId, Heartbeat>, ancestor: &str, descendant: &str) -> bool {
        if ancestor == descendant {
            return false;
        }
        let mut current = agents.get(descendant).and_then(|hb| hb.parent_id.clone());
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = agents.get(&id).and_then(|hb| hb.parent_id.clone());
        }
        false
    }

    fn collect_descendants(agents: &HashMap<AgentId, Heartbeat>, root: &str) -> Vec<AgentId> {
        let mut result = Vec::new();
        let mut frontier = vec![root.to_string()];
        while let Some(current) = frontier.pop() {
            for (id, hb) in agents.iter() {
                if hb.parent_id.as_deref() == Some(current.as_str()) {
                    result.push(id.clone());
                    frontier.push(id.clone());
                }
            }
        }
        result
    }

    pub async fn heal_agent(&self, healer: &str, target: &str) -> LifecycleResult<HealResult> {
        self.ensure_not_disposed()?;
        let now = self.time.now_utc();
        let mut agents = self.inner.agents.write().await;

        if !agents.contains_key(healer) {
            return Ok(HealResult::fail(format!("healer {healer} does not exist")));
        }
        let Some(target_hb) = agents.get(target) else {
            return Ok(HealResult::fail(format!("target {target} does not exist")));
        };
        if !matches!(target_hb.status, AgentStatus::Stale | AgentStatus::Error) {
            return Ok(HealResult::fail(format!(
                "target {target} is not in a healable state ({})",
                target_hb.status
            )));
        }
        if !Self::is_ancestor(&agents, healer, target) {
            return Ok(HealResult::fail(format!("{healer} is not an ancestor of {target}")));
        }

        self.set_status(&mut agents, &target.to_string(), AgentStatus::Alive, now);
        drop(agents);

        self.inner.stuck_reasons.lock().unwrap().remove(target);
        Ok(HealResult::ok())
    }

    pub async fn kill_agent(&self, killer: &str, target: &str) -> LifecycleResult<KillResult> {
        self.ensure_not_disposed()?;
        let now = self.time.now_utc();
        let mut agents = self.inner.agents.write().await;

        if !agents.contains_key(killer) {
            return Ok(KillResult::failure(format!("killer {killer} does not exist")));
        }
        let Some(target_hb) = agents.get(target) else {
            return Ok(KillResult::failure(format!("target {target} does not exist")));
        };
        if target_hb.status.is_terminal() {
            return Ok(KillResult::failure(format!("target {target} is already terminal")));
        }
        if !Self::is_ancestor(&agents, killer, target) {
            return Ok(KillResult::failure(format!("{killer} is not an ancestor of {target}")));
        }

        let mut victims = Self::collect_descendants(&agents, target);
        victims.push(target.to_string());
        victims.retain(|id| !agents.get(id).map(|hb| hb.status.is_terminal()).unwrap_or(true));
        // Strictly bottom-up: deepest first so a kill cascade never leaves a
        // transient orphan above an already-killed node (spec.md invariant 7).
        victims.sort_by(|a, b| {
            let da = agents.get(a).map(|hb| hb.depth).unwrap_or(0);
            let db = agents.get(b).map(|hb| hb.depth).unwrap_or(0);
            db.cmp(&da)
        });

        let mut freed_tokens: u64 = 0;
        for id in &victims {
            if let Some(hb) = agents.get(id) {
                freed_tokens += hb.remaining_budget();
            }
            self.set_status(&mut agents, id, AgentStatus::Killed, now);
        }
        let killed: Vec<Heartbeat> = victims.iter().filter_map(|id| agents.get(id).cloned()).collect();
        drop(agents);
        for hb in &killed {
            self.store.upsert_heartbeat(hb).await?;
        }

        tracing::info!(killer, target, cascade = victims.len(), "kill cascade complete");

        Ok(KillResult {
            success: true,
            cascade_count: victims.len(),
            killed_ids: victims,
            freed_tokens,
            reason: None,
        })
    }

    pub async fn can_spawn(&self, id: &str) -> CanSpawn {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return CanSpawn::denied("lifecycle manager disposed");
        }
        let config = self.inner.config.read().await;
        let agents = self.inner.agents.read().await;

        let Some(hb) = agents.get(id) else {
            return CanSpawn::denied(format!("agent {id} does not exist"));
        };
        if hb.status != AgentStatus::Alive {
            return CanSpawn::denied(format!("agent {id} is not alive ({})", hb.status));
        }
        if hb.depth >= config.effective_max_depth() {
            return CanSpawn::denied("at maximum depth");
        }
        let child_count = agents
            .values()
            .filter(|other| other.parent_id.as_deref() == Some(id))
            .count() as u32;
        if child_count >= config.effective_max_subs() {
            return CanSpawn::denied("at maximum sub-agent fanout");
        }
        let alive_total = agents
            .values()
            .filter(|hb| matches!(hb.status, AgentStatus::Alive | AgentStatus::Stale))
            .count() as u32;
        if alive_total >= config.global_max_agents {
            return CanSpawn::denied("global agent cap reached");
        }
        let child_budget = Self::compute_child_budget_locked(hb, &config);
        if child_budget < config.min_token_budget_for_spawn {
            return CanSpawn::denied(format!("insufficient budget ({child_budget} < minimum)"));
        }

        CanSpawn::allowed()
    }

    fn compute_child_budget_locked(parent: &Heartbeat, config: &KaalaConfig) -> u64 {
        // Open question 2: the decay factor applies once per spawn, not
        // compounded by depth; preserved from the source behavior.
        ((parent.token_budget as f64) * config.budget_decay_factor).floor() as u64
    }

    pub async fn compute_child_budget(&self, parent_id: &str) -> LifecycleResult<u64> {
        let config = self.inner.config.read().await;
        let agents = self.inner.agents.read().await;
        let parent = agents
            .get(parent_id)
            .ok_or_else(|| LifecycleError::NotFound(parent_id.to_string()))?;
        Ok(Self::compute_child_budget_locked(parent, &config))
    }

    pub async fn get_agent_health(&self, id: &str) -> Option<AgentHealthReport> {
        let now = self.time.now_utc();
        let agents = self.inner.agents.read().await;
        let hb = agents.get(id)?;
        Some(AgentHealthReport {
            agent_id: hb.agent_id.clone(),
            status: hb.status,
            depth: hb.depth,
            turn_count: hb.turn_count,
            token_usage: hb.token_usage,
            token_budget: hb.token_budget,
            utilization: if hb.token_budget == 0 {
                0.0
            } else {
                hb.token_usage as f64 / hb.token_budget as f64
            },
            ms_since_last_beat: (now - hb.last_beat).num_milliseconds(),
        })
    }

    pub async fn get_tree_health(&self) -> TreeHealthReport {
        let agents = self.inner.agents.read().await;
        let mut report = TreeHealthReport::default();
        report.total_agents = agents.len();
        for hb in agents.values() {
            match hb.status {
                AgentStatus::Alive => {
                    report.alive_count += 1;
                    report.deepest_alive_depth = report.deepest_alive_depth.max(hb.depth);
                    if hb.token_budget > 0 && (hb.token_usage as f64 / hb.token_budget as f64) >= 0.9 {
                        report.agents_near_budget_exhaustion.push(hb.agent_id.clone());
                    }
                }
                AgentStatus::Stale => report.stale_count += 1,
                AgentStatus::Dead => report.dead_count += 1,
                AgentStatus::Killed => report.killed_count += 1,
                AgentStatus::Completed => report.completed_count += 1,
                AgentStatus::Error => report.error_count += 1,
            }
        }
        report
    }

    pub async fn set_config(&self, config: KaalaConfig) {
        *self.inner.config.write().await = config;
    }

    /// The periodic sweep (`healTree`). Steps follow spec.md §4.4 in order:
    /// promote by staleness, cascade-kill dead branches, reap terminals,
    /// resolve orphans per policy, kill over-budget agents.
    pub async fn heal_tree(&self) -> LifecycleResult<HealReport> {
        self.ensure_not_disposed()?;
        let now = self.time.now_utc();
        let config = self.inner.config.read().await.clone();
        let mut agents = self.inner.agents.write().await;

        // 1. Promote by timestamp thresholds.
        let stale_ids: Vec<AgentId> = agents
            .iter()
            .filter(|(_, hb)| {
                hb.status == AgentStatus::Alive && (now - hb.last_beat).num_milliseconds() >= config.stale_threshold_ms
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale_ids {
            self.set_status(&mut agents, id, AgentStatus::Stale, now);
        }

        let dead_ids: Vec<AgentId> = agents
            .iter()
            .filter(|(_, hb)| {
                hb.status == AgentStatus::Stale && (now - hb.last_beat).num_milliseconds() >= config.dead_threshold_ms
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead_ids {
            self.set_status(&mut agents, id, AgentStatus::Dead, now);
        }

        // 2. Cascade-kill descendants of every dead agent, bottom-up.
        let mut killed_stale_count = 0usize;
        for dead_id in &dead_ids {
            let mut victims = Self::collect_descendants(&agents, dead_id);
            victims.retain(|id| !agents.get(id).map(|hb| hb.status.is_terminal()).unwrap_or(true));
            victims.sort_by(|a, b| {
                let da = agents.get(a).map(|hb| hb.depth).unwrap_or(0);
                let db = agents.get(b).map(|hb| hb.depth).unwrap_or(0);
                db.cmp(&da)
            });
            for id in &victims {
                self.set_status(&mut agents, id, AgentStatus::Killed, now);
            }
            killed_stale_count += victims.len();
        }

        // 3. Reap all dead and killed heartbeats.
        let reaped: Vec<AgentId> = agents
            .iter()
            .filter(|(_, hb)| matches!(hb.status, AgentStatus::Dead | AgentStatus::Killed))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &reaped {
            agents.remove(id);
            self.inner.stuck_reasons.lock().unwrap().remove(id);
        }
        for id in &reaped {
            self.store.delete_heartbeat(id).await?;
        }
        let reaped_count = reaped.len();

        // 4. Orphan policy for heartbeats whose parent no longer resolves.
        let orphans_handled = self.apply_orphan_policy(&mut agents, &config, now);

        // 5. Kill any alive agent over budget.
        let over_budget: Vec<AgentId> = agents
            .iter()
            .filter(|(_, hb)| hb.status == AgentStatus::Alive && hb.over_budget())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &over_budget {
            self.set_status(&mut agents, id, AgentStatus::Killed, now);
        }

        Ok(HealReport {
            reaped_count,
            killed_stale_count,
            orphans_handled,
            over_budget_killed: over_budget.len(),
            timestamp: Some(now),
        })
    }

    fn apply_orphan_policy(&self, agents: &mut HashMap<AgentId, Heartbeat>, config: &KaalaConfig, now: DateTime<Utc>) -> usize {
        let orphan_ids: Vec<AgentId> = agents
            .iter()
            .filter(|(_, hb)| {
                hb.parent_id
                    .as_ref()
                    .map(|p| !agents.contains_key(p))
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        if orphan_ids.is_empty() {
            return 0;
        }

        match config.orphan_policy {
            OrphanPolicy::Cascade => {
                for orphan in &orphan_ids {
                    let mut victims = Self::collect_descendants(agents, orphan);
                    victims.push(orphan.clone());
                    victims.retain(|id| !agents.get(id).map(|hb| hb.status.is_terminal()).unwrap_or(true));
                    victims.sort_by(|a, b| {
                        let da = agents.get(a).map(|hb| hb.depth).unwrap_or(0);
                        let db = agents.get(b).map(|hb| hb.depth).unwrap_or(0);
                        db.cmp(&da)
                    });
                    for id in &victims {
                        self.set_status(agents, id, AgentStatus::Killed, now);
                    }
                }
                orphan_ids.len()
            }
            OrphanPolicy::Reparent => {
                for orphan in &orphan_ids {
                    if let Some(hb) = agents.get_mut(orphan) {
                        hb.parent_id = None;
                        hb.depth = 0;
                    }
                }
                orphan_ids.len()
            }
            OrphanPolicy::Promote => {
                let mut by_missing_parent: HashMap<AgentId, Vec<AgentId>> = HashMap::new();
                for orphan in &orphan_ids {
                    if let Some(missing) = agents.get(orphan).and_then(|hb| hb.parent_id.clone()) {
                        by_missing_parent.entry(missing).or_default().push(orphan.clone());
                    }
                }
                for (_missing_parent, mut siblings) in by_missing_parent {
                    siblings.sort_by_key(|id| agents.get(id).map(|hb| hb.started_at).unwrap_or(now));
                    let Some((promoted, rest)) = siblings.split_first() else {
                        continue;
                    };
                    let new_depth = agents.get(promoted).map(|hb| hb.depth.saturating_sub(1)).unwrap_or(0);
                    if let Some(hb) = agents.get_mut(promoted) {
                        hb.parent_id = None;
                        hb.depth = new_depth;
                    }
                    for sibling in rest {
                        if let Some(hb) = agents.get_mut(sibling) {
                            hb.parent_id = Some(promoted.clone());
                        }
                    }
                }
                orphan_ids.len()
            }
        }
    }

    pub fn start_monitoring(self: &Arc<Self>) {
        let kaala = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let interval_ms = kaala.inner.config.read().await.heartbeat_interval_ms;
                let sweep_start = std::time::Instant::now();

                tokio::select! {
                    _ = kaala.inner.monitor_shutdown.notified() => break,
                    result = kaala.heal_tree() => {
                        if let Err(err) = result {
                            tracing::warn!(%err, "heal_tree sweep failed");
                            break;
                        }
                    }
                }

                let elapsed = sweep_start.elapsed();
                let budget = std::time::Duration::from_millis(interval_ms);
                let next_delay = budget.saturating_sub(elapsed);

                tokio::select! {
                    _ = kaala.inner.monitor_shutdown.notified() => break,
                    _ = tokio::time::sleep(next_delay) => {}
                }
            }
        });
        *self.inner.monitor_handle.lock().unwrap() = Some(handle);
    }

    pub fn stop_monitoring(&self) {
        self.inner.monitor_shutdown.notify_waiters();
        if let Some(handle) = self.inner.monitor_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub async fn dispose(&self) {
        self.stop_monitoring();
        let now = self.time.now_utc();
        let mut agents = self.inner.agents.write().await;
        let ids: Vec<AgentId> = agents
            .iter()
            .filter(|(_, hb)| !hb.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.set_status(&mut agents, id, AgentStatus::Killed, now);
        }
        agents.clear();
        self.inner.stuck_reasons.lock().unwrap().clear();
        self.inner.disposed.store(true, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Vec<Heartbeat> {
        self.inner.agents.read().await.values().cloned().collect()
    }
}
