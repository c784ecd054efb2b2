//! In-process `Store` used by tests and by hosts that don't need durability
//! across restarts.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LifecycleResult;
use crate::kaala::heartbeat::{AgentId, Heartbeat};
use crate::vidhi::model::{Vidhi, VidhiId};

use super::Store;

#[derive(Default)]
pub struct InMemoryStore {
    heartbeats: Mutex<HashMap<AgentId, Heartbeat>>,
    vidhis: Mutex<HashMap<VidhiId, Vidhi>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_heartbeat(&self, hb: &Heartbeat) -> LifecycleResult<()> {
        self.heartbeats.lock().unwrap().insert(hb.agent_id.clone(), hb.clone());
        Ok(())
    }

    async fn delete_heartbeat(&self, agent_id: &str) -> LifecycleResult<()> {
        self.heartbeats.lock().unwrap().remove(agent_id);
        Ok(())
    }

    async fn load_all_heartbeats(&self) -> LifecycleResult<Vec<Heartbeat>> {
        Ok(self.heartbeats.lock().unwrap().values().cloned().collect())
    }

    async fn upsert_vidhi(&self, vidhi: &Vidhi) -> LifecycleResult<()> {
        self.vidhis.lock().unwrap().insert(vidhi.id.clone(), vidhi.clone());
        Ok(())
    }

    async fn load_vidhi(&self, id: &str) -> LifecycleResult<Option<Vidhi>> {
        Ok(self.vidhis.lock().unwrap().get(id).cloned())
    }

    async fn load_all_vidhis(&self, project: &str) -> LifecycleResult<Vec<Vidhi>> {
        Ok(self
            .vidhis
            .lock()
            .unwrap()
            .values()
            .filter(|v| v.project == project)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kaala::heartbeat::Heartbeat;
    use chrono::Utc;

    #[tokio::test]
    async fn heartbeat_roundtrip() {
        let store = InMemoryStore::new();
        let hb = Heartbeat::new_root("a1", "test", 1000, Utc::now());
        store.upsert_heartbeat(&hb).await.unwrap();
        let all = store.load_all_heartbeats().await.unwrap();
        assert_eq!(all.len(), 1);
        store.delete_heartbeat("a1").await.unwrap();
        assert!(store.load_all_heartbeats().await.unwrap().is_empty());
    }
}
