//! TurnMetrics ring (C2) — spec.md §3 "Turn metric", retained in a ring of
//! 100; health thresholds evaluated over the last <= 20 (spec.md §4.3).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const RING_CAPACITY: usize = 100;
const HEALTH_WINDOW: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMetric {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub latency_ms: u64,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub had_error: bool,
    pub error_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TurnMetricsRing {
    records: VecDeque<TurnMetric>,
}

impl TurnMetricsRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metric: TurnMetric) {
        self.records.push_back(metric);
        while self.records.len() > RING_CAPACITY {
            self.records.pop_front();
        }
    }

    fn recent_window(&self) -> impl Iterator<Item = &TurnMetric> {
        let skip = self.records.len().saturating_sub(HEALTH_WINDOW);
        self.records.iter().skip(skip)
    }

    pub fn error_rate(&self) -> f64 {
        let window: Vec<&TurnMetric> = self.recent_window().collect();
        if window.is_empty() {
            return 0.0;
        }
        let errors = window.iter().filter(|m| m.had_error).count();
        errors as f64 / window.len() as f64
    }

    pub fn average_latency_ms(&self) -> f64 {
        let window: Vec<&TurnMetric> = self.recent_window().collect();
        if window.is_empty() {
            return 0.0;
        }
        let total: u64 = window.iter().map(|m| m.latency_ms).sum();
        total as f64 / window.len() as f64
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub error_rate_warning_threshold: f64,
    pub latency_warning_ms: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            error_rate_warning_threshold: 0.3,
            latency_warning_ms: 30_000,
        }
    }
}
