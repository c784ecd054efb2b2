//! End-to-end coverage of the six concrete scenarios, run against the
//! public crate surface with `InMemoryStore` rather than unit-level
//! internals.

use std::collections::HashMap;
use std::sync::Arc;

use agent_lifecycle_core::kaala::{Heartbeat, HeartbeatUpdate, Kaala, KaalaConfig};
use agent_lifecycle_core::time::testing::FakeTimeSource;
use agent_lifecycle_core::vidhi::{ParamType, Role, SessionRecord, Turn, Vidhi, VidhiConfig, VidhiParam, VidhiStep};
use agent_lifecycle_core::{AutonomyWrapper, EventBus, LifecycleEvent, Store, VidhiEngine, WrapperConfig};

use agent_lifecycle_core::store::memory::InMemoryStore;
use agent_lifecycle_core::vidhi::model::ToolCallRecord;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

fn kaala_with_fake_time() -> (Arc<Kaala>, Arc<FakeTimeSource>) {
    let time = Arc::new(FakeTimeSource::new(Utc::now()));
    let kaala = Arc::new(Kaala::with_time_source(
        KaalaConfig::default(),
        Arc::new(EventBus::new()),
        time.clone(),
        Arc::new(InMemoryStore::new()),
    ));
    (kaala, time)
}

/// Scenario 1: A(root) -> B -> {C, D}; A kills B.
#[tokio::test]
async fn bottom_up_kill_cascade() {
    let (kaala, time) = kaala_with_fake_time();
    kaala.register_agent(Heartbeat::new_root("a", "root task", 10_000, time.now_utc())).await.unwrap();
    kaala.register_agent(Heartbeat::new_child("b", "a", 1, "mid", 8_000, time.now_utc())).await.unwrap();
    kaala.register_agent(Heartbeat::new_child("c", "b", 2, "leaf", 2_000, time.now_utc())).await.unwrap();
    kaala.register_agent(Heartbeat::new_child("d", "b", 2, "leaf", 2_000, time.now_utc())).await.unwrap();

    let result = kaala.kill_agent("a", "b").await.unwrap();
    assert!(result.success);
    assert_eq!(result.cascade_count, 3);

    let mut ordered = result.killed_ids.clone();
    let last = ordered.pop().unwrap();
    assert_eq!(last, "b");
    ordered.sort();
    assert_eq!(ordered, vec!["c".to_string(), "d".to_string()]);

    for id in ["b", "c", "d"] {
        let health = kaala.get_agent_health(id).await.unwrap();
        assert_eq!(health.status, agent_lifecycle_core::kaala::AgentStatus::Killed);
    }
}

/// Scenario 2: A -> B, unrelated X; X cannot kill B.
#[tokio::test]
async fn ancestor_only_enforcement() {
    let (kaala, time) = kaala_with_fake_time();
    kaala.register_agent(Heartbeat::new_root("a", "root", 10_000, time.now_utc())).await.unwrap();
    kaala.register_agent(Heartbeat::new_child("b", "a", 1, "mid", 5_000, time.now_utc())).await.unwrap();
    kaala.register_agent(Heartbeat::new_root("x", "unrelated", 5_000, time.now_utc())).await.unwrap();

    let result = kaala.kill_agent("x", "b").await.unwrap();
    assert!(!result.success);
    assert!(result.reason.unwrap().contains("not an ancestor"));
}

/// Scenario 3: parent budget 10 000, decay factor 0.7 -> childBudget 7000;
/// with minTokenBudgetForSpawn=8000, canSpawn is denied for a budget reason.
#[tokio::test]
async fn budget_decay_on_spawn() {
    let (kaala, time) = kaala_with_fake_time();
    let config = KaalaConfig::default().with_budget_decay_factor(0.7).with_min_token_budget_for_spawn(8_000);
    kaala.set_config(config).await;
    kaala.register_agent(Heartbeat::new_root("parent", "root", 10_000, time.now_utc())).await.unwrap();

    let child_budget = kaala.compute_child_budget("parent").await.unwrap();
    assert_eq!(child_budget, 7_000);

    let can_spawn = kaala.can_spawn("parent").await;
    assert!(!can_spawn.allowed);
    assert!(can_spawn.reason.unwrap().contains("budget"));
}

/// Scenario 4: fails twice with "429", then "ok"; maxRetries=3, baseDelayMs=100.
#[tokio::test]
async fn retry_then_succeed() {
    let events = Arc::new(EventBus::new());
    let wrapper = AutonomyWrapper::new("agent-1", WrapperConfig::default(), events.clone());

    let mut rx = events.subscribe();
    let attempts = std::sync::atomic::AtomicU32::new(0);

    let result = wrapper
        .with_retry(|| {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("429 Too Many Requests".to_string())
                } else {
                    Ok("ok".to_string())
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "ok");

    let mut retry_events = 0;
    let mut classifications = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            LifecycleEvent::AutonomyRetry { .. } => retry_events += 1,
            LifecycleEvent::AutonomyErrorClassified { kind, .. } => classifications.push(kind),
            _ => {}
        }
    }
    assert_eq!(retry_events, 2);
    assert_eq!(classifications.len(), 2);
    assert!(classifications.iter().all(|k| k == "transient"));
}

/// Scenario 5: threshold=5, five consecutive failures on "bash" disables it;
/// the next success re-enables it.
#[tokio::test]
async fn tool_disable_and_reenable() {
    let events = Arc::new(EventBus::new());
    let wrapper = AutonomyWrapper::new(
        "agent-1",
        WrapperConfig {
            tool_disable_threshold: 5,
            ..WrapperConfig::default()
        },
        events.clone(),
    );

    let mut rx = events.subscribe();
    for _ in 0..5 {
        wrapper.on_tool_used("bash", false).await;
    }
    assert!(wrapper.is_tool_disabled("bash").await);

    let mut disabled_events = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, LifecycleEvent::AutonomyToolDisabled { tool, .. } if tool == "bash") {
            disabled_events += 1;
        }
    }
    assert_eq!(disabled_events, 1);

    wrapper.on_tool_used("bash", true).await;
    assert!(!wrapper.is_tool_disabled("bash").await);

    let mut reenabled_events = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, LifecycleEvent::AutonomyToolReenabled { tool, .. } if tool == "bash") {
            reenabled_events += 1;
        }
    }
    assert_eq!(reenabled_events, 1);
}

struct FixedSessions(Vec<SessionRecord>);

#[async_trait]
impl agent_lifecycle_core::SessionSource for FixedSessions {
    async fn load_sessions(&self, _project: &str) -> agent_lifecycle_core::LifecycleResult<Vec<SessionRecord>> {
        Ok(self.0.clone())
    }
}

fn read_edit_session(id: &str, path: &str) -> SessionRecord {
    let mut read_input = HashMap::new();
    read_input.insert("path".to_string(), Value::String(path.to_string()));
    read_input.insert("encoding".to_string(), Value::String("utf-8".to_string()));

    let mut edit_input = HashMap::new();
    edit_input.insert("path".to_string(), Value::String(path.to_string()));
    edit_input.insert("encoding".to_string(), Value::String("utf-8".to_string()));

    SessionRecord {
        id: id.to_string(),
        project: "proj".to_string(),
        turns: vec![
            Turn {
                role: Role::User,
                content: "please fix the bug in this file".to_string(),
                tool_calls: vec![],
            },
            Turn {
                role: Role::Assistant,
                content: String::new(),
                tool_calls: vec![
                    ToolCallRecord {
                        name: "read".to_string(),
                        input: read_input,
                        result: None,
                        is_error: false,
                    },
                    ToolCallRecord {
                        name: "edit".to_string(),
                        input: edit_input,
                        result: None,
                        is_error: false,
                    },
                ],
            },
        ],
    }
}

/// Scenario 6: four sessions with `read -> edit`, varying `path`, constant
/// `encoding`; minSessions=3 yields one Vidhi with the spec's exact shape.
#[tokio::test]
async fn vidhi_extraction_from_four_sessions() {
    let sessions = vec![
        read_edit_session("s1", "/a.rs"),
        read_edit_session("s2", "/b.rs"),
        read_edit_session("s3", "/c.rs"),
        read_edit_session("s4", "/d.rs"),
    ];
    let store = Arc::new(InMemoryStore::new());
    let engine = VidhiEngine::new(store.clone(), Arc::new(FixedSessions(sessions)), VidhiConfig::default());

    let report = engine.extract("proj").await.unwrap();
    assert_eq!(report.new_vidhis, 1);

    let vidhis = engine.load_all("proj").await.unwrap();
    assert_eq!(vidhis.len(), 1);
    let vidhi: &Vidhi = &vidhis[0];
    assert_eq!(vidhi.learned_from.len(), 4);
    assert_eq!(vidhi.confidence, 0.9);

    let read_step: &VidhiStep = &vidhi.steps[0];
    assert_eq!(read_step.arg_template.get("encoding"), Some(&Value::String("utf-8".into())));
    let path_value = read_step.arg_template.get("path").unwrap();
    let param_name = agent_lifecycle_core::vidhi::model::param_reference(path_value).unwrap();
    let param: &VidhiParam = &vidhi.parameter_schema[param_name];
    assert_eq!(param.param_type, ParamType::String);

    // Matching against a query whose tokens overlap the mined trigger
    // phrases should surface this vidhi ahead of an unrelated one.
    let matched = engine.match_query("proj", "please fix the bug").await.unwrap();
    assert!(matched.is_some());
}

/// Registering, heartbeating, and killing an agent durably persists its
/// heartbeat through the `Store`, and the reaper deletes it once terminal.
#[tokio::test]
async fn heartbeats_are_persisted_through_store() {
    let time = Arc::new(FakeTimeSource::new(Utc::now()));
    let store = Arc::new(InMemoryStore::new());
    let kaala = Arc::new(Kaala::with_time_source(
        KaalaConfig::default(),
        Arc::new(EventBus::new()),
        time.clone(),
        store.clone(),
    ));

    kaala.register_agent(Heartbeat::new_root("root", "p", 10_000, time.now_utc())).await.unwrap();
    assert_eq!(store.load_all_heartbeats().await.unwrap().len(), 1);

    kaala
        .record_heartbeat("root", Some(HeartbeatUpdate { turn_count: Some(2), token_usage: None, purpose: None }))
        .await
        .unwrap();
    let persisted = store.load_all_heartbeats().await.unwrap();
    assert_eq!(persisted[0].turn_count, 2);

    kaala.mark_completed("root").await.unwrap();
    let persisted = store.load_all_heartbeats().await.unwrap();
    assert_eq!(persisted[0].status, agent_lifecycle_core::kaala::AgentStatus::Completed);

    let report = kaala.heal_tree().await.unwrap();
    assert_eq!(report.reaped_count, 0);
}

/// `healTree` on a steady-state tree (no stale/dead agents) returns all
/// zeros (spec.md §8 round-trip property).
#[tokio::test]
async fn heal_tree_is_a_noop_in_steady_state() {
    let (kaala, time) = kaala_with_fake_time();
    kaala.register_agent(Heartbeat::new_root("root", "p", 10_000, time.now_utc())).await.unwrap();

    let report = kaala.heal_tree().await.unwrap();
    assert_eq!(report.reaped_count, 0);
    assert_eq!(report.killed_stale_count, 0);
    assert_eq!(report.orphans_handled, 0);
    assert_eq!(report.over_budget_killed, 0);
}

/// `persist(v); loadAll(project)` round-trips a vidhi deep-equal to `v`
/// through the store's JSON boundary.
#[tokio::test]
async fn vidhi_persist_round_trips_through_store() {
    let store = Arc::new(InMemoryStore::new());
    let engine = VidhiEngine::new(
        store.clone(),
        Arc::new(FixedSessions(vec![])),
        VidhiConfig::default(),
    );

    let now = Utc::now();
    let vidhi = Vidhi {
        id: "v-roundtrip".into(),
        project: "proj".into(),
        name: "read_then_edit".into(),
        steps: vec![],
        triggers: vec!["fix bug".into()],
        parameter_schema: HashMap::new(),
        learned_from: vec!["s1".into(), "s2".into(), "s3".into()],
        confidence: 0.8,
        success_count: 2,
        failure_count: 1,
        success_rate: 0.75,
        created_at: now,
        updated_at: now,
    };

    engine.persist(&vidhi).await.unwrap();
    let loaded = engine.load_all("proj").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, vidhi.id);
    assert_eq!(loaded[0].learned_from, vidhi.learned_from);
    assert_eq!(loaded[0].success_rate, vidhi.success_rate);
}
