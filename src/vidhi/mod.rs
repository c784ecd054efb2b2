//! Vidhi — procedural memory (spec.md component C7).

pub mod beta;
pub mod extract;
pub mod fnv;
pub mod match_;
pub mod model;
pub mod text;

use std::sync::Arc;

pub use extract::{ExtractReport, VidhiConfig};
pub use model::{ParamType, Role, SessionRecord, Turn, Vidhi, VidhiParam, VidhiStep};

use crate::error::LifecycleResult;
use crate::store::{SessionSource, Store};
use crate::time::{SystemTimeSource, TimeSource};

pub struct VidhiEngine {
    store: Arc<dyn Store>,
    sessions: Arc<dyn SessionSource>,
    config: VidhiConfig,
    time: Arc<dyn TimeSource>,
}

impl VidhiEngine {
    pub fn new(store: Arc<dyn Store>, sessions: Arc<dyn SessionSource>, config: VidhiConfig) -> Self {
        Self::with_time_source(store, sessions, config, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(
        store: Arc<dyn Store>,
        sessions: Arc<dyn SessionSource>,
        config: VidhiConfig,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            store,
            sessions,
            config,
            time,
        }
    }

    pub async fn extract(&self, project: &str) -> LifecycleResult<ExtractReport> {
        extract::extract(self.store.as_ref(), self.sessions.as_ref(), project, &self.config, self.time.as_ref()).await
    }

    pub async fn match_query(&self, project: &str, query: &str) -> LifecycleResult<Option<Vidhi>> {
        let candidates = self.store.load_all_vidhis(project).await?;
        Ok(match_::match_query(query, &candidates))
    }

    pub async fn get_vidhis(&self, project: &str, top_k: usize) -> LifecycleResult<Vec<Vidhi>> {
        let candidates = self.store.load_all_vidhis(project).await?;
        Ok(match_::top_k_by_thompson_sample(&candidates, top_k))
    }

    pub async fn record_outcome(&self, vidhi_id: &str, success: bool) -> LifecycleResult<()> {
        if let Some(mut vidhi) = self.store.load_vidhi(vidhi_id).await? {
            vidhi.record_outcome(success, self.time.now_utc());
            self.store.upsert_vidhi(&vidhi).await?;
        }
        Ok(())
    }

    pub async fn persist(&self, vidhi: &Vidhi) -> LifecycleResult<()> {
        self.store.upsert_vidhi(vidhi).await
    }

    pub async fn load_all(&self, project: &str) -> LifecycleResult<Vec<Vidhi>> {
        self.store.load_all_vidhis(project).await
    }

    pub async fn get_vidhi(&self, id: &str) -> LifecycleResult<Option<Vidhi>> {
        self.store.load_vidhi(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    struct EmptySessions;

    #[async_trait]
    impl SessionSource for EmptySessions {
        async fn load_sessions(&self, _project: &str) -> LifecycleResult<Vec<SessionRecord>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn record_outcome_is_noop_for_unknown_id() {
        let engine = VidhiEngine::new(Arc::new(InMemoryStore::new()), Arc::new(EmptySessions), VidhiConfig::default());
        assert!(engine.record_outcome("missing", true).await.is_ok());
    }

    #[tokio::test]
    async fn record_outcome_updates_success_rate() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let vidhi = Vidhi {
            id: "v1".into(),
            project: "p".into(),
            name: "n".into(),
            steps: vec![],
            triggers: vec![],
            parameter_schema: HashMap::new(),
            learned_from: vec!["s1".into(); 3],
            confidence: 0.8,
            success_count: 0,
            failure_count: 0,
            success_rate: 0.5,
            created_at: now,
            updated_at: now,
        };
        store.upsert_vidhi(&vidhi).await.unwrap();

        let engine = VidhiEngine::new(store.clone(), Arc::new(EmptySessions), VidhiConfig::default());
        engine.record_outcome("v1", true).await.unwrap();

        let updated = store.load_vidhi("v1").await.unwrap().unwrap();
        assert_eq!(updated.success_count, 1);
        assert_eq!(updated.success_rate, 2.0 / 3.0);
    }
}
