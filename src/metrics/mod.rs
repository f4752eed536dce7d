//! Prometheus metrics for monitoring.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Requests answered
    pub requests_total: AtomicU64,
    /// Requests answered with a JSON-RPC error
    pub requests_failed: AtomicU64,
    /// Messages refused before dispatch
    pub messages_rejected: AtomicU64,
    /// Notifications received from clients
    pub notifications_received: AtomicU64,
    /// Notifications pushed to clients
    pub notifications_sent: AtomicU64,
    /// Tool calls
    pub tool_calls: AtomicU64,
    /// Tasks created
    pub tasks_created: AtomicU64,
    /// Server-initiated requests sent
    pub client_requests: AtomicU64,
    /// Active sessions
    pub active_sessions: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one answered request.
    pub fn record_request(&self, failed: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_received(&self) {
        self.notifications_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_client_requests(&self) {
        self.client_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Set active sessions.
    pub fn set_active_sessions(&self, count: u64) {
        self.active_sessions.store(count, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            client_requests: self.client_requests.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let series: [(&str, &str, &str, u64); 9] = [
            ("requests_total", "counter", "Requests answered", s.requests_total),
            ("requests_failed", "counter", "Requests answered with an error", s.requests_failed),
            ("messages_rejected", "counter", "Messages refused before dispatch", s.messages_rejected),
            ("notifications_received", "counter", "Notifications received from clients", s.notifications_received),
            ("notifications_sent", "counter", "Notifications pushed to clients", s.notifications_sent),
            ("tool_calls", "counter", "Tool calls", s.tool_calls),
            ("tasks_created", "counter", "Tasks created", s.tasks_created),
            ("client_requests", "counter", "Server-initiated requests sent", s.client_requests),
            ("active_sessions", "gauge", "Active sessions", s.active_sessions),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP mcp_engine_{name} {help}\n# TYPE mcp_engine_{name} {kind}\nmcp_engine_{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub messages_rejected: u64,
    pub notifications_received: u64,
    pub notifications_sent: u64,
    pub tool_calls: u64,
    pub tasks_created: u64,
    pub client_requests: u64,
    pub active_sessions: u64,
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        let metrics = Metrics::new();
        metrics.record_request(false);
        metrics.record_request(true);

        let s = metrics.snapshot();
        assert_eq!(s.requests_total, 2);
        assert_eq!(s.requests_failed, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.inc_tool_calls();
        metrics.inc_tasks_created();
        metrics.set_active_sessions(3);

        let text = metrics.to_prometheus();
        assert!(text.contains("# TYPE mcp_engine_tool_calls counter"));
        assert!(text.contains("mcp_engine_tool_calls 1\n"));
        assert!(text.contains("mcp_engine_tasks_created 1\n"));
        assert!(text.contains("# TYPE mcp_engine_active_sessions gauge"));
        assert!(text.contains("mcp_engine_active_sessions 3\n"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        assert!(timer.elapsed_ms() < 60_000);
    }
}
