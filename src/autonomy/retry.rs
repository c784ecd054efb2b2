//! `withRetry` (spec.md §4.2) — exponential backoff with jitter, driven by
//! `ErrorClassifier`. Simplified relative to the retrieved `oxidizer`
//! `Retry<In, Out, S>` tower middleware: this crate has exactly one retry
//! site (the AutonomyWrapper's turn loop) so a plain async-fn helper in the
//! teacher's style is enough — no generic `Service` abstraction is
//! warranted at this scale.

use std::future::Future;

use rand::Rng;

use crate::provider::CancelHandle;

use super::classifier::{classify, Classification, ErrorKind};

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Unknown-kind failures are retried up to this many times before being
    /// escalated to fatal (spec.md §4.1: "Unknown ⇒ retryable up to a small
    /// cap tracked by the wrapper").
    pub unknown_retry_cap: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 10_000,
            unknown_retry_cap: 2,
        }
    }
}

/// One step of the retry loop, reported so callers can emit
/// `autonomy:error_classified` / `autonomy:retry` events.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    ErrorClassified { attempt: u32, classification: Classification },
    Retrying { attempt: u32, delay_ms: u64 },
}

pub fn backoff_delay_ms(base_delay_ms: u64, max_delay_ms: u64, attempt: u32, rng: &mut impl Rng) -> u64 {
    let exp = base_delay_ms.saturating_mul(1u64 << attempt.min(32));
    let capped = exp.min(max_delay_ms);
    let jitter_ceiling = (capped as f64 * 0.25) as u64;
    let jitter = if jitter_ceiling == 0 { 0 } else { rng.gen_range(0..=jitter_ceiling) };
    (capped + jitter).min(max_delay_ms)
}

/// spec.md §5's cancellation contract: "on cancel, in-flight retries
/// short-circuit to fatal with reason `cancelled`."
fn cancelled_classification() -> Classification {
    Classification {
        kind: ErrorKind::Fatal,
        retryable: false,
        backoff_hint_ms: None,
        reason: "cancelled".to_string(),
    }
}

/// Runs `op` with retry, sleeping via `sleep` (injected so tests don't need
/// real time) between attempts. `on_event` is called for every classified
/// attempt and retry, matching the "emit for each step" contract. `cancel`
/// is checked before every attempt and, via cooperative yielding, while the
/// backoff sleep is in flight.
pub async fn with_retry<Op, Fut, T, Sleep, SleepFut>(
    mut op: Op,
    config: RetryConfig,
    mut sleep: Sleep,
    mut on_event: impl FnMut(RetryEvent),
    cancel: &CancelHandle,
) -> Result<T, Classification>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
    Sleep: FnMut(u64) -> SleepFut,
    SleepFut: Future<Output = ()>,
{
    let mut rng = rand::thread_rng();
    let mut last_classification: Option<Classification> = None;

    for attempt in 0..=config.max_retries {
        if cancel.is_cancelled() {
            return Err(cancelled_classification());
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(message) => {
                let classification = classify(&message);
                on_event(RetryEvent::ErrorClassified {
                    attempt,
                    classification: classification.clone(),
                });

                let should_retry = match classification.kind {
                    ErrorKind::Fatal => false,
                    ErrorKind::Transient => true,
                    ErrorKind::Unknown => attempt < config.unknown_retry_cap,
                };

                if !should_retry || attempt == config.max_retries {
                    last_classification = Some(classification);
                    break;
                }

                let delay_ms = backoff_delay_ms(config.base_delay_ms, config.max_delay_ms, attempt, &mut rng);
                on_event(RetryEvent::Retrying { attempt, delay_ms });

                let sleep_fut = sleep(delay_ms);
                tokio::pin!(sleep_fut);
                loop {
                    if cancel.is_cancelled() {
                        return Err(cancelled_classification());
                    }
                    tokio::select! {
                        _ = &mut sleep_fut => break,
                        _ = tokio::task::yield_now() => {}
                    }
                }
                last_classification = Some(classification);
            }
        }
    }

    Err(last_classification.unwrap_or(Classification {
        kind: ErrorKind::Unknown,
        retryable: false,
        backoff_hint_ms: None,
        reason: "retry loop exited without a recorded classification".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let mut retry_events = Vec::new();
        let cancel = CancelHandle::new();

        let result = with_retry(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("HTTP 429 rate limit".to_string())
                    } else {
                        Ok("ok".to_string())
                    }
                }
            },
            RetryConfig {
                max_retries: 3,
                base_delay_ms: 1,
                max_delay_ms: 10,
                unknown_retry_cap: 2,
            },
            |_ms| async {},
            |event| retry_events.push(format!("{event:?}")),
            &cancel,
        )
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let retrying_count = retry_events.iter().filter(|e| e.contains("Retrying")).count();
        assert_eq!(retrying_count, 2);
    }

    #[tokio::test]
    async fn fatal_error_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let cancel = CancelHandle::new();

        let result: Result<String, _> = with_retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("401 unauthorized".to_string()) }
            },
            RetryConfig::default(),
            |_ms| async {},
            |_event| {},
            &cancel,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_escalates_after_cap() {
        let attempts = AtomicU32::new(0);
        let cancel = CancelHandle::new();

        let result: Result<String, _> = with_retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("something weird".to_string()) }
            },
            RetryConfig {
                max_retries: 5,
                base_delay_ms: 1,
                max_delay_ms: 10,
                unknown_retry_cap: 2,
            },
            |_ms| async {},
            |_event| {},
            &cancel,
        )
        .await;

        assert!(result.is_err());
        // Attempts 0 and 1 retry (< cap), attempt 2 does not.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_to_fatal() {
        let attempts = AtomicU32::new(0);
        let cancel = CancelHandle::new();
        cancel.cancel();

        let result: Result<String, _> = with_retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok("unreachable".to_string()) }
            },
            RetryConfig::default(),
            |_ms| async {},
            |_event| {},
            &cancel,
        )
        .await;

        let classification = result.unwrap_err();
        assert_eq!(classification.kind, ErrorKind::Fatal);
        assert_eq!(classification.reason, "cancelled");
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
