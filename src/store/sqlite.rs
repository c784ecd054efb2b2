//! SQLite-backed `Store`.
//!
//! Grounded in `orchestrator::queue::SqliteTaskQueue`: a single
//! `rusqlite::Connection` behind a blocking mutex, every call wrapped in
//! `tokio::task::spawn_blocking` since `rusqlite` has no async API, schema
//! created with `CREATE TABLE IF NOT EXISTS` on construction. Column names
//! and types follow spec.md §6 bit-for-bit; malformed rows are logged and
//! skipped rather than failing the whole load (design note §9, "reject
//! malformed rows with a logged warning rather than crashing the sweep").

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::{LifecycleError, LifecycleResult};
use crate::kaala::heartbeat::{AgentStatus, Heartbeat};
use crate::vidhi::model::Vidhi;

use super::Store;

pub struct SqliteStore {
    conn: Arc<StdMutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> LifecycleResult<Self> {
        let conn = Connection::open(path).map_err(|e| LifecycleError::Store(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> LifecycleResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| LifecycleError::Store(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> LifecycleResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS heartbeats (
                agent_id TEXT PRIMARY KEY,
                parent_id TEXT,
                depth INT,
                purpose TEXT,
                started_at INT,
                last_beat INT,
                turn_count INT,
                token_usage INT,
                token_budget INT,
                status TEXT
             );
             CREATE TABLE IF NOT EXISTS vidhis (
                id TEXT PRIMARY KEY,
                project TEXT,
                name TEXT,
                steps_json TEXT,
                triggers_json TEXT,
                parameter_schema_json TEXT,
                learned_from_json TEXT,
                confidence REAL,
                success_count INT,
                failure_count INT,
                success_rate REAL,
                created_at INT,
                updated_at INT
             );",
        )
        .map_err(|e| LifecycleError::Store(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    fn heartbeat_from_row(row: &Row) -> rusqlite::Result<Heartbeat> {
        let status_str: String = row.get("status")?;
        let status = parse_status(&status_str).unwrap_or(AgentStatus::Error);
        Ok(Heartbeat {
            agent_id: row.get("agent_id")?,
            parent_id: row.get("parent_id")?,
            depth: row.get::<_, i64>("depth")? as u32,
            purpose: row.get("purpose")?,
            started_at: millis_to_dt(row.get("started_at")?),
            last_beat: millis_to_dt(row.get("last_beat")?),
            turn_count: row.get::<_, i64>("turn_count")? as u32,
            token_usage: row.get::<_, i64>("token_usage")? as u64,
            token_budget: row.get::<_, i64>("token_budget")? as u64,
            status,
        })
    }
}

fn dt_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn millis_to_dt(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn status_str(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Alive => "alive",
        AgentStatus::Stale => "stale",
        AgentStatus::Dead => "dead",
        AgentStatus::Killed => "killed",
        AgentStatus::Completed => "completed",
        AgentStatus::Error => "error",
    }
}

fn parse_status(s: &str) -> Option<AgentStatus> {
    Some(match s {
        "alive" => AgentStatus::Alive,
        "stale" => AgentStatus::Stale,
        "dead" => AgentStatus::Dead,
        "killed" => AgentStatus::Killed,
        "completed" => AgentStatus::Completed,
        "error" => AgentStatus::Error,
        _ => return None,
    })
}

fn vidhi_from_row(row: &Row) -> rusqlite::Result<Option<Vidhi>> {
    let id: String = row.get("id")?;
    let steps_json: String = row.get("steps_json")?;
    let triggers_json: String = row.get("triggers_json")?;
    let parameter_schema_json: String = row.get("parameter_schema_json")?;
    let learned_from_json: String = row.get("learned_from_json")?;

    let steps = serde_json::from_str(&steps_json);
    let triggers = serde_json::from_str(&triggers_json);
    let parameter_schema = serde_json::from_str(&parameter_schema_json);
    let learned_from = serde_json::from_str(&learned_from_json);

    let (Ok(steps), Ok(triggers), Ok(parameter_schema), Ok(learned_from)) =
        (steps, triggers, parameter_schema, learned_from)
    else {
        tracing::warn!(vidhi_id = %id, "dropping malformed vidhi row");
        return Ok(None);
    };

    Ok(Some(Vidhi {
        id,
        project: row.get("project")?,
        name: row.get("name")?,
        steps,
        triggers,
        parameter_schema,
        learned_from,
        confidence: row.get("confidence")?,
        success_count: row.get::<_, i64>("success_count")? as u64,
        failure_count: row.get::<_, i64>("failure_count")? as u64,
        success_rate: row.get("success_rate")?,
        created_at: millis_to_dt(row.get("created_at")?),
        updated_at: millis_to_dt(row.get("updated_at")?),
    }))
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_heartbeat(&self, hb: &Heartbeat) -> LifecycleResult<()> {
        let conn = self.conn.clone();
        let hb = hb.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO heartbeats
                    (agent_id, parent_id, depth, purpose, started_at, last_beat, turn_count, token_usage, token_budget, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(agent_id) DO UPDATE SET
                    parent_id=excluded.parent_id, depth=excluded.depth, purpose=excluded.purpose,
                    started_at=excluded.started_at, last_beat=excluded.last_beat,
                    turn_count=excluded.turn_count, token_usage=excluded.token_usage,
                    token_budget=excluded.token_budget, status=excluded.status",
                params![
                    hb.agent_id,
                    hb.parent_id,
                    hb.depth,
                    hb.purpose,
                    dt_to_millis(hb.started_at),
                    dt_to_millis(hb.last_beat),
                    hb.turn_count,
                    hb.token_usage as i64,
                    hb.token_budget as i64,
                    status_str(hb.status),
                ],
            )
            .map(|_| ())
            .map_err(|e| LifecycleError::Store(e.to_string()))
        })
        .await
        .map_err(|e| LifecycleError::Store(e.to_string()))?
    }

    async fn delete_heartbeat(&self, agent_id: &str) -> LifecycleResult<()> {
        let conn = self.conn.clone();
        let agent_id = agent_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute("DELETE FROM heartbeats WHERE agent_id = ?1", params![agent_id])
                .map(|_| ())
                .map_err(|e| LifecycleError::Store(e.to_string()))
        })
        .await
        .map_err(|e| LifecycleError::Store(e.to_string()))?
    }

    async fn load_all_heartbeats(&self) -> LifecycleResult<Vec<Heartbeat>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT * FROM heartbeats")
                .map_err(|e| LifecycleError::Store(e.to_string()))?;
            let rows = stmt
                .query_map([], Self::heartbeat_from_row)
                .map_err(|e| LifecycleError::Store(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                match row {
                    Ok(hb) => out.push(hb),
                    Err(e) => tracing::warn!(%e, "dropping malformed heartbeat row"),
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| LifecycleError::Store(e.to_string()))?
    }

    async fn upsert_vidhi(&self, vidhi: &Vidhi) -> LifecycleResult<()> {
        let conn = self.conn.clone();
        let vidhi = vidhi.clone();
        let steps_json = serde_json::to_string(&vidhi.steps).map_err(|e| LifecycleError::Store(e.to_string()))?;
        let triggers_json = serde_json::to_string(&vidhi.triggers).map_err(|e| LifecycleError::Store(e.to_string()))?;
        let parameter_schema_json =
            serde_json::to_string(&vidhi.parameter_schema).map_err(|e| LifecycleError::Store(e.to_string()))?;
        let learned_from_json =
            serde_json::to_string(&vidhi.learned_from).map_err(|e| LifecycleError::Store(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO vidhis
                    (id, project, name, steps_json, triggers_json, parameter_schema_json, learned_from_json,
                     confidence, success_count, failure_count, success_rate, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO UPDATE SET
                    project=excluded.project, name=excluded.name, steps_json=excluded.steps_json,
                    triggers_json=excluded.triggers_json, parameter_schema_json=excluded.parameter_schema_json,
                    learned_from_json=excluded.learned_from_json, confidence=excluded.confidence,
                    success_count=excluded.success_count, failure_count=excluded.failure_count,
                    success_rate=excluded.success_rate, updated_at=excluded.updated_at",
                params![
                    vidhi.id,
                    vidhi.project,
                    vidhi.name,
                    steps_json,
                    triggers_json,
                    parameter_schema_json,
                    learned_from_json,
                    vidhi.confidence,
                    vidhi.success_count as i64,
                    vidhi.failure_count as i64,
                    vidhi.success_rate,
                    dt_to_millis(vidhi.created_at),
                    dt_to_millis(vidhi.updated_at),
                ],
            )
            .map(|_| ())
            .map_err(|e| LifecycleError::Store(e.to_string()))
        })
        .await
        .map_err(|e| LifecycleError::Store(e.to_string()))?
    }

    async fn load_vidhi(&self, id: &str) -> LifecycleResult<Option<Vidhi>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let result: rusqlite::Result<Option<Vidhi>> =
                conn.query_row("SELECT * FROM vidhis WHERE id = ?1", params![id], |row| vidhi_from_row(row));
            match result {
                Ok(opt) => Ok(opt),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(LifecycleError::Store(e.to_string())),
            }
        })
        .await
        .map_err(|e| LifecycleError::Store(e.to_string()))?
    }

    async fn load_all_vidhis(&self, project: &str) -> LifecycleResult<Vec<Vidhi>> {
        let conn = self.conn.clone();
        let project = project.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT * FROM vidhis WHERE project = ?1")
                .map_err(|e| LifecycleError::Store(e.to_string()))?;
            let rows = stmt
                .query_map(params![project], vidhi_from_row)
                .map_err(|e| LifecycleError::Store(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                match row {
                    Ok(Some(v)) => out.push(v),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(%e, "dropping malformed vidhi row"),
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| LifecycleError::Store(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn heartbeat_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let hb = Heartbeat::new_root("a1", "purpose", 1000, Utc::now());
        store.upsert_heartbeat(&hb).await.unwrap();

        let loaded = store.load_all_heartbeats().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].agent_id, "a1");
        assert_eq!(loaded[0].status, AgentStatus::Alive);

        store.delete_heartbeat("a1").await.unwrap();
        assert!(store.load_all_heartbeats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vidhi_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let vidhi = Vidhi {
            id: "v1".into(),
            project: "proj".into(),
            name: "read-edit".into(),
            steps: vec![],
            triggers: vec!["fix".into()],
            parameter_schema: HashMap::new(),
            learned_from: vec!["s1".into(), "s2".into()],
            confidence: 0.7,
            success_count: 2,
            failure_count: 1,
            success_rate: 0.75,
            created_at: now,
            updated_at: now,
        };
        store.upsert_vidhi(&vidhi).await.unwrap();

        let loaded = store.load_vidhi("v1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "read-edit");
        assert_eq!(loaded.learned_from.len(), 2);

        let by_project = store.load_all_vidhis("proj").await.unwrap();
        assert_eq!(by_project.len(), 1);
    }
}
