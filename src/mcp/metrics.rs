//! Metrics collaborator.
//!
//! The server reports request and tool-call activity to a `MetricsRecorder`
//! injected at construction. `ServerMetrics` is the in-memory default and
//! backs the `/metrics` endpoint in HTTP mode.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fire-and-forget sink for server activity. Implementations must not fail.
pub trait MetricsRecorder: Send + Sync {
    /// One protocol request was received (notifications included).
    fn record_request(&self);

    /// One tool invocation finished.
    fn record_tool_call(&self, tool: &str, elapsed: Duration, is_error: bool);

    /// Current counters, for recorders that keep them in process.
    fn report(&self) -> Option<MetricsSnapshot> {
        None
    }
}

/// Per-tool counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct ToolStats {
    pub calls: u64,
    pub errors: u64,
    pub total_latency_ms: f64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub tool_calls_total: u64,
    pub tools: BTreeMap<String, ToolStats>,
}

/// In-memory metrics recorder.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    requests: AtomicU64,
    tool_calls: AtomicU64,
    tools: Mutex<BTreeMap<String, ToolStats>>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        MetricsSnapshot {
            requests_total: self.requests.load(Ordering::Relaxed),
            tool_calls_total: self.tool_calls.load(Ordering::Relaxed),
            tools: tools.clone(),
        }
    }
}

impl MetricsRecorder for ServerMetrics {
    fn record_request(&self) {
        // Relaxed is enough: counters are independent and only read for reporting.
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_tool_call(&self, tool: &str, elapsed: Duration, is_error: bool) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        let mut tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = tools.entry(tool.to_string()).or_default();
        stats.calls += 1;
        if is_error {
            stats.errors += 1;
        }
        stats.total_latency_ms += elapsed.as_secs_f64() * 1000.0;
    }

    fn report(&self) -> Option<MetricsSnapshot> {
        Some(self.snapshot())
    }
}
