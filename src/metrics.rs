use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// The operations exposed by the service, as a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Search,
    Answer,
    SuggestUpdate,
    ApplyUpdate,
    CompareReleases,
    ServiceDependencies,
    Refresh,
}

/// Per-operation call counters. A fixed record, not an open map.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ToolCalls {
    pub search: u64,
    pub answer: u64,
    pub suggest_update: u64,
    pub apply_update: u64,
    pub compare_releases: u64,
    pub service_dependencies: u64,
    pub refresh: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    pub tool_calls: ToolCalls,
}

#[derive(Default)]
struct MetricsInner {
    requests: u64,
    errors: u64,
    total_latency_ms: u64,
    tool_calls: ToolCalls,
}

/// Request metrics recorder shared across handlers.
pub struct Metrics {
    inner: Mutex<MetricsInner>,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner::default()),
            started_at: Instant::now(),
        }
    }

    pub fn record(&self, tool: Tool, latency: Duration, ok: bool) {
        let mut inner = self.inner.lock();
        inner.requests += 1;
        if !ok {
            inner.errors += 1;
        }
        inner.total_latency_ms += latency.as_millis() as u64;
        let calls = &mut inner.tool_calls;
        match tool {
            Tool::Search => calls.search += 1,
            Tool::Answer => calls.answer += 1,
            Tool::SuggestUpdate => calls.suggest_update += 1,
            Tool::ApplyUpdate => calls.apply_update += 1,
            Tool::CompareReleases => calls.compare_releases += 1,
            Tool::ServiceDependencies => calls.service_dependencies += 1,
            Tool::Refresh => calls.refresh += 1,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let avg = if inner.requests == 0 {
            0.0
        } else {
            inner.total_latency_ms as f64 / inner.requests as f64
        };
        MetricsSnapshot {
            requests: inner.requests,
            errors: inner.errors,
            avg_latency_ms: avg,
            tool_calls: inner.tool_calls,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
