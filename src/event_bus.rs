//! Internal event bus.
//!
//! Grounded in `orchestrator::event_bus::EventBus`: a `tokio::sync::broadcast`
//! channel carrying a single tagged enum. Unlike the teacher, this bus is not
//! a `lazy_static` process-wide singleton — each `Kaala`/`AutonomyWrapper`
//! owns or is handed an `Arc<EventBus>` so independent lifecycles (tests, in
//! particular) don't cross-talk. A synchronous `on/off/emit` registry is
//! layered on top of the same dispatch for callers that want direct callback
//! registration instead of a channel receiver, matching the closed event set
//! in spec.md §6.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::kaala::heartbeat::AgentStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum LifecycleEvent {
    #[serde(rename = "autonomy:retry")]
    AutonomyRetry {
        agent_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    #[serde(rename = "autonomy:error_classified")]
    AutonomyErrorClassified {
        agent_id: String,
        kind: String,
        retryable: bool,
    },
    #[serde(rename = "autonomy:compaction")]
    AutonomyCompaction {
        agent_id: String,
        tier: String,
        before_tokens: usize,
        after_tokens: usize,
    },
    #[serde(rename = "autonomy:tool_disabled")]
    AutonomyToolDisabled { agent_id: String, tool: String },
    #[serde(rename = "autonomy:tool_reenabled")]
    AutonomyToolReenabled { agent_id: String, tool: String },
    #[serde(rename = "autonomy:health_warning")]
    AutonomyHealthWarning {
        agent_id: String,
        reason: String,
    },
    #[serde(rename = "autonomy:context_recovered")]
    AutonomyContextRecovered {
        agent_id: String,
        method: String,
        original_len: usize,
        recovered_len: usize,
    },
    #[serde(rename = "autonomy:degraded")]
    AutonomyDegraded { agent_id: String, degraded: bool, reason: String },
    #[serde(rename = "kaala:status_change")]
    KaalaStatusChange {
        agent_id: String,
        old_status: AgentStatus,
        new_status: AgentStatus,
        parent_id: Option<String>,
    },
}

type Handler = Box<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Opaque token returned by `on`/`once`, the only way to target a specific
/// handler for `off` (spec.md §6's closed operation set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    once: bool,
    handler: Handler,
}

pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
    handlers: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            tx,
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Publish an event to both channel subscribers and registered handlers.
    /// A handler that panics is caught so one bad listener can't take down
    /// the sweeper or the turn loop (design note: "best-effort listener
    /// dispatch"). `once` registrations are removed after this dispatch,
    /// whether or not they panicked.
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event.clone());
        let mut handlers = self.handlers.lock().unwrap();
        for reg in handlers.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (reg.handler)(&event)));
            if result.is_err() {
                tracing::warn!("event bus handler panicked; ignoring");
            }
        }
        handlers.retain(|reg| !reg.once);
    }

    fn register(&self, once: bool, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.lock().unwrap().push(Registration { id, once, handler });
        id
    }

    /// Register a callback invoked in registration order for every emitted
    /// event (callers filter by variant themselves, keeping one registry
    /// for the closed event set). Returns a token usable with `off`.
    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.register(false, Box::new(handler))
    }

    /// Like `on`, but the handler is removed after its first invocation.
    pub fn once<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.register(true, Box::new(handler))
    }

    /// Removes a single handler registered via `on`/`once`. A no-op if the
    /// id was already removed (by `off`, by firing once, or by `remove_all`).
    pub fn off(&self, id: HandlerId) {
        self.handlers.lock().unwrap().retain(|reg| reg.id != id);
    }

    pub fn remove_all(&self) {
        self.handlers.lock().unwrap().clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn emit_reaches_registered_handlers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.on(move |_event| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(LifecycleEvent::AutonomyDegraded {
            agent_id: "a1".into(),
            degraded: true,
            reason: "test".into(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        bus.on(|_event| panic!("boom"));
        bus.on(move |_event| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(LifecycleEvent::AutonomyDegraded {
            agent_id: "a1".into(),
            degraded: true,
            reason: "test".into(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_stops_further_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let id = bus.on(move |_event| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(LifecycleEvent::AutonomyDegraded {
            agent_id: "a1".into(),
            degraded: true,
            reason: "test".into(),
        });
        bus.off(id);
        bus.emit(LifecycleEvent::AutonomyDegraded {
            agent_id: "a1".into(),
            degraded: true,
            reason: "test".into(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_fires_a_single_time() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.once(move |_event| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..3 {
            bus.emit(LifecycleEvent::AutonomyDegraded {
                agent_id: "a1".into(),
                degraded: true,
                reason: "test".into(),
            });
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(LifecycleEvent::AutonomyRetry {
            agent_id: "a1".into(),
            attempt: 1,
            delay_ms: 100,
        });
        let received = rx.recv().await.unwrap();
        matches!(received, LifecycleEvent::AutonomyRetry { .. });
    }
}
