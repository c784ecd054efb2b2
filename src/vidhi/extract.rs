//! Vidhi extraction: n-gram mining over session tool-call sequences,
//! anti-unification of their arguments into templates, and trigger mining
//! from the preceding user turns (spec.md §4.5 `extract` algorithm, steps
//! 1-10).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::fnv::fnv1a_hex;
use super::model::{ParamType, Role, SessionRecord, ToolCallRecord, Vidhi, VidhiParam, VidhiStep};
use super::text::{extract_verb_phrases, tokenize};

#[derive(Debug, Clone)]
pub struct VidhiConfig {
    pub min_sessions: usize,
    pub min_success_rate: f64,
    pub min_sequence_length: usize,
    pub max_sequence_length: usize,
}

impl Default for VidhiConfig {
    fn default() -> Self {
        Self {
            min_sessions: 3,
            min_success_rate: 0.5,
            min_sequence_length: 2,
            max_sequence_length: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub new_vidhis: usize,
    pub reinforced: usize,
    pub total_sequences_analyzed: usize,
    pub duration_ms: u64,
}

/// A tool call with the id of the session it came from and the preceding
/// user turn's text, which feeds trigger mining.
#[derive(Debug, Clone)]
struct PositionedCall {
    session_id: String,
    call: ToolCallRecord,
    preceding_user_text: String,
}

#[derive(Debug, Clone)]
struct WindowInstance {
    session_id: String,
    calls: Vec<ToolCallRecord>,
    preceding_user_text: String,
}

#[derive(Default)]
struct KeyAggregate {
    distinct_sessions: HashSet<String>,
    instances: Vec<WindowInstance>,
}

/// Flattens a session's turns into an ordered tool-call stream, tagging
/// each call with the text of the nearest preceding user turn.
fn flatten_session(session: &SessionRecord) -> Vec<PositionedCall> {
    let mut out = Vec::new();
    let mut last_user_text = String::new();
    for turn in &session.turns {
        if turn.role == Role::User {
            last_user_text = turn.content.clone();
        }
        for call in &turn.tool_calls {
            out.push(PositionedCall {
                session_id: session.id.clone(),
                call: call.clone(),
                preceding_user_text: last_user_text.clone(),
            });
        }
    }
    out
}

fn window_key(calls: &[ToolCallRecord]) -> String {
    calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join("|")
}

/// Runs the full extraction pass for one project and upserts results into
/// the store, returning the summary counts `extract()` contracts for.
pub async fn extract(
    store: &dyn crate::store::Store,
    sessions: &dyn crate::store::SessionSource,
    project: &str,
    config: &VidhiConfig,
    time: &dyn crate::time::TimeSource,
) -> crate::error::LifecycleResult<ExtractReport> {
    let started = time.monotonic_now();
    let sessions = sessions.load_sessions(project).await?;

    let mut aggregates: HashMap<String, KeyAggregate> = HashMap::new();
    let mut total_sequences_analyzed = 0usize;

    for session in &sessions {
        let flat = flatten_session(session);
        for n in config.min_sequence_length..=config.max_sequence_length {
            if flat.len() < n {
                continue;
            }
            for window in flat.windows(n) {
                total_sequences_analyzed += 1;
                if window.iter().any(|c| c.call.is_error) {
                    continue;
                }
                let calls: Vec<ToolCallRecord> = window.iter().map(|c| c.call.clone()).collect();
                let key = window_key(&calls);
                let agg = aggregates.entry(key).or_default();
                agg.distinct_sessions.insert(session.id.clone());
                agg.instances.push(WindowInstance {
                    session_id: session.id.clone(),
                    calls,
                    preceding_user_text: window[0].preceding_user_text.clone(),
                });
            }
        }
    }

    aggregates.retain(|_, agg| agg.distinct_sessions.len() >= config.min_sessions);

    let mut ranked: Vec<(String, KeyAggregate)> = aggregates.into_iter().collect();
    ranked.sort_by(|(ka, a), (kb, b)| {
        let na = ka.split('|').count();
        let nb = kb.split('|').count();
        let score_a = a.distinct_sessions.len() * na;
        let score_b = b.distinct_sessions.len() * nb;
        score_b.cmp(&score_a)
    });

    let mut new_vidhis = 0usize;
    let mut reinforced = 0usize;
    let now = time.now_utc();

    for (key, agg) in ranked {
        let vidhi = build_vidhi(project, &key, &agg, now);
        match store.load_vidhi(&vidhi.id).await? {
            Some(existing) => {
                let merged = reinforce(existing, vidhi, now);
                store.upsert_vidhi(&merged).await?;
                reinforced += 1;
            }
            None => {
                store.upsert_vidhi(&vidhi).await?;
                new_vidhis += 1;
            }
        }
    }

    let duration_ms = (time.monotonic_now() - started).as_millis() as u64;

    Ok(ExtractReport {
        new_vidhis,
        reinforced,
        total_sequences_analyzed,
        duration_ms,
    })
}

fn infer_type(values: &[&Value]) -> ParamType {
    let mut saw_string = false;
    let mut saw_number = false;
    let mut saw_bool = false;
    for v in values {
        match v {
            Value::String(_) => saw_string = true,
            Value::Number(_) => saw_number = true,
            Value::Bool(_) => saw_bool = true,
            _ => saw_string = true,
        }
    }
    match (saw_string, saw_number, saw_bool) {
        (false, true, false) => ParamType::Number,
        (false, false, true) => ParamType::Boolean,
        _ => ParamType::String,
    }
}

/// Anti-unification: for each step position and argument key, a value that
/// is identical across all instances becomes a template literal; a value
/// that varies becomes a `${param}` placeholder with an inferred type and
/// up to 5 distinct examples.
fn build_vidhi(project: &str, key: &str, agg: &KeyAggregate, now: DateTime<Utc>) -> Vidhi {
    let n = agg.instances[0].calls.len();
    let mut steps = Vec::with_capacity(n);
    let mut parameter_schema = HashMap::new();
    let mut param_counter = 0usize;

    for step_idx in 0..n {
        let tool_name = agg.instances[0].calls[step_idx].name.clone();
        let mut arg_keys: HashSet<String> = HashSet::new();
        for inst in &agg.instances {
            arg_keys.extend(inst.calls[step_idx].input.keys().cloned());
        }

        let mut arg_template = HashMap::new();
        for arg_key in arg_keys {
            let values: Vec<&Value> = agg
                .instances
                .iter()
                .filter_map(|inst| inst.calls[step_idx].input.get(&arg_key))
                .collect();

            let all_equal = values.windows(2).all(|pair| pair[0] == pair[1]) && values.len() == agg.instances.len();

            if all_equal {
                arg_template.insert(arg_key, values[0].clone());
            } else {
                param_counter += 1;
                let param_name = format!("param_{arg_key}_{param_counter}");
                let examples: Vec<Value> = {
                    let mut seen = HashSet::new();
                    let mut ex = Vec::new();
                    for v in &values {
                        let s = v.to_string();
                        if seen.insert(s) {
                            ex.push((*v).clone());
                        }
                        if ex.len() >= 5 {
                            break;
                        }
                    }
                    ex
                };
                parameter_schema.insert(
                    param_name.clone(),
                    VidhiParam {
                        name: param_name.clone(),
                        param_type: infer_type(&values),
                        description: format!("varying value for {arg_key}"),
                        required: true,
                        examples,
                    },
                );
                arg_template.insert(arg_key, Value::String(format!("${{{param_name}}}")));
            }
        }

        steps.push(VidhiStep {
            index: step_idx,
            tool_name,
            arg_template,
            description: String::new(),
            critical: step_idx == n - 1,
        });
    }

    let mut triggers = rank_triggers(agg);
    triggers.truncate(10);

    let learned_from: Vec<String> = agg.distinct_sessions.iter().cloned().collect();
    let confidence = (0.5 + 0.1 * agg.distinct_sessions.len() as f64).min(1.0);

    let normalized_template = steps
        .iter()
        .map(|s| {
            let mut pairs: Vec<(String, String)> =
                s.arg_template.iter().map(|(k, v)| (k.clone(), v.to_string())).collect();
            pairs.sort();
            format!(
                "{}:{}",
                s.tool_name,
                pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
            )
        })
        .collect::<Vec<_>>()
        .join(";");

    let id = fnv1a_hex(&format!("{key}::{normalized_template}"));

    Vidhi {
        id,
        project: project.to_string(),
        name: key.replace('|', "_then_"),
        steps,
        triggers,
        parameter_schema,
        learned_from,
        confidence,
        success_count: 0,
        failure_count: 0,
        success_rate: 0.5,
        created_at: now,
        updated_at: now,
    }
}

fn rank_triggers(agg: &KeyAggregate) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for inst in &agg.instances {
        let tokens = tokenize(&inst.preceding_user_text);
        for phrase in extract_verb_phrases(&tokens) {
            *counts.entry(phrase).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(pa, ca), (pb, cb)| cb.cmp(ca).then_with(|| pa.cmp(pb)));
    ranked.into_iter().map(|(phrase, _)| phrase).collect()
}

/// Merges a freshly-mined vidhi into an existing one with the same id:
/// union `learnedFrom`, bump confidence by the merged session count (capped
/// at 1.0), refresh `updatedAt`. Outcome counters are untouched — they are
/// owned by `recordOutcome`, not extraction.
fn reinforce(mut existing: Vidhi, fresh: Vidhi, now: DateTime<Utc>) -> Vidhi {
    let mut learned: HashSet<String> = existing.learned_from.into_iter().collect();
    learned.extend(fresh.learned_from);
    existing.learned_from = learned.into_iter().collect();
    existing.confidence = (0.5 + 0.1 * existing.learned_from.len() as f64).min(1.0);
    existing.steps = fresh.steps;
    existing.triggers = fresh.triggers;
    existing.parameter_schema = fresh.parameter_schema;
    existing.updated_at = now;
    existing
}
