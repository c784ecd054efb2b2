//! Injectable time source.
//!
//! The teacher reaches for `chrono::Utc::now()` directly wherever it needs a
//! timestamp (`orchestrator::healing::HealingEngine::diagnose`,
//! `orchestrator::queue::SqliteTaskQueue`). The design notes for this crate
//! call that out as an implicit global to remove: Kaala's sweeper, Autonomy's
//! metrics, and Vidhi's outcome updates all take a `&dyn TimeSource` so tests
//! can advance time deterministically instead of sleeping.

use chrono::{DateTime, Utc};
use std::time::Instant;

pub trait TimeSource: Send + Sync {
    /// Wall-clock timestamp, used for persisted records.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Monotonic instant, used for interval math that must not jump with
    /// system clock adjustments.
    fn monotonic_now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    /// A controllable clock for deterministic tests. `monotonic_now` still
    /// reads the real `Instant::now()` (it cannot be faked without a custom
    /// `Instant` type), but `now_utc` advances only when told to.
    pub struct FakeTimeSource {
        millis_since_epoch: AtomicI64,
        base_instant: Instant,
        offset_ms: Mutex<i64>,
    }

    impl FakeTimeSource {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis_since_epoch: AtomicI64::new(start.timestamp_millis()),
                base_instant: Instant::now(),
                offset_ms: Mutex::new(0),
            }
        }

        pub fn advance(&self, millis: i64) {
            self.millis_since_epoch.fetch_add(millis, Ordering::SeqCst);
            *self.offset_ms.lock().unwrap() += millis;
        }
    }

    impl TimeSource for FakeTimeSource {
        fn now_utc(&self) -> DateTime<Utc> {
            let ms = self.millis_since_epoch.load(Ordering::SeqCst);
            DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
        }

        fn monotonic_now(&self) -> Instant {
            let offset = *self.offset_ms.lock().unwrap();
            if offset >= 0 {
                self.base_instant + std::time::Duration::from_millis(offset as u64)
            } else {
                self.base_instant
            }
        }
    }
}
