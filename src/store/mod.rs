//! Store facade (C9) — the persistence boundary Kaala and Vidhi depend on.
//!
//! spec.md §4.7 describes the facade as raw `exec`/`prepare().run()` SQL
//! passthrough; §9's design notes call that out as "JSON blobs in SQL
//! columns" to replace with "strongly-typed records at the boundary,
//! validate on load, reject malformed rows with a logged warning rather
//! than crashing the sweep." This module keeps the bit-exact column
//! contract from spec.md §6 inside `sqlite::SqliteStore` but exposes
//! named, typed methods rather than a SQL passthrough — grounded in the
//! teacher's `orchestrator::queue::TaskQueue` trait, which wraps
//! `SqliteTaskQueue`'s raw `rusqlite::Connection` behind named async
//! methods instead of exec/prepare.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::LifecycleResult;
use crate::kaala::heartbeat::Heartbeat;
use crate::vidhi::model::{SessionRecord, Vidhi};

/// Durable storage for Kaala's heartbeats and Vidhi's learned procedures.
///
/// Session records are deliberately not part of this trait: spec.md §2
/// frames them as delivered by "the external session store," a distinct
/// collaborator Vidhi only reads from — not a table this crate owns or
/// writes to. `SessionSource` models that read-only boundary separately.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_heartbeat(&self, hb: &Heartbeat) -> LifecycleResult<()>;
    async fn delete_heartbeat(&self, agent_id: &str) -> LifecycleResult<()>;
    async fn load_all_heartbeats(&self) -> LifecycleResult<Vec<Heartbeat>>;

    async fn upsert_vidhi(&self, vidhi: &Vidhi) -> LifecycleResult<()>;
    async fn load_vidhi(&self, id: &str) -> LifecycleResult<Option<Vidhi>>;
    async fn load_all_vidhis(&self, project: &str) -> LifecycleResult<Vec<Vidhi>>;
}

/// Read-only access to the session history Vidhi mines. Owned by the host
/// application; this crate never writes session records.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn load_sessions(&self, project: &str) -> LifecycleResult<Vec<SessionRecord>>;
}
