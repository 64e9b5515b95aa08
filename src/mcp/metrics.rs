//! Per-session request metrics.
//!
//! The transport loop records every answered request here: its method, how
//! long it took and, for failures, the error kind. Tool calls are also
//! tallied per tool. A [`MetricsSnapshot`] is logged when the session ends
//! and can be taken at any time through [`McpServer::metrics`].
//!
//! [`McpServer::metrics`]: crate::mcp::McpServer::metrics

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;

/// Number of recent response times kept for percentiles.
const LATENCY_WINDOW: usize = 1000;

/// Call and error counts for one method or tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallStats {
    /// Completed calls.
    pub calls: u64,
    /// Calls that ended in an error.
    pub errors: u64,
    /// Summed handling time in milliseconds.
    pub total_ms: f64,
}

impl CallStats {
    fn record(&mut self, elapsed: Duration, failed: bool) {
        self.calls += 1;
        if failed {
            self.errors += 1;
        }
        self.total_ms += elapsed.as_secs_f64() * 1000.0;
    }

    /// Mean handling time in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_ms / self.calls as f64
        }
    }
}

/// Response time percentiles over the recent window, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Percentiles {
    /// Median.
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 99th percentile.
    pub p99: f64,
}

/// Point-in-time view of the session metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Seconds since the session started.
    pub uptime_seconds: f64,
    /// Answered requests.
    pub request_count: u64,
    /// Requests answered with an error.
    pub error_count: u64,
    /// `error_count / request_count`, zero before the first request.
    pub error_rate: f64,
    /// Mean response time in milliseconds.
    pub average_response_ms: f64,
    /// Recent response time percentiles.
    pub response_ms: Percentiles,
    /// Stats keyed by JSON-RPC method, in first-seen order.
    pub requests_by_method: IndexMap<String, CallStats>,
    /// Failures keyed by error kind (`ToolExecutionError`, ...).
    pub errors_by_kind: IndexMap<String, u64>,
    /// Stats keyed by tool name for `tools/call`.
    pub tools: IndexMap<String, CallStats>,
}

#[derive(Debug, Default)]
struct Counters {
    totals: CallStats,
    recent: VecDeque<f64>,
    by_method: IndexMap<String, CallStats>,
    errors_by_kind: IndexMap<String, u64>,
    tools: IndexMap<String, CallStats>,
}

/// Thread-safe metrics collector shared by the dispatch loop and workers.
#[derive(Debug)]
pub struct RequestMetrics {
    started: Instant,
    counters: Mutex<Counters>,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMetrics {
    /// Starts a collector with its uptime clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Records one answered request.
    ///
    /// `tool` names the tool for `tools/call`; `error_kind` is the failure
    /// kind when the request was answered with an error.
    pub fn record(
        &self,
        method: &str,
        tool: Option<&str>,
        elapsed: Duration,
        error_kind: Option<&str>,
    ) {
        let failed = error_kind.is_some();
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        counters.totals.record(elapsed, failed);
        if counters.recent.len() == LATENCY_WINDOW {
            counters.recent.pop_front();
        }
        counters.recent.push_back(elapsed.as_secs_f64() * 1000.0);

        counters
            .by_method
            .entry(method.to_string())
            .or_default()
            .record(elapsed, failed);
        if let Some(tool) = tool {
            counters
                .tools
                .entry(tool.to_string())
                .or_default()
                .record(elapsed, failed);
        }
        if let Some(kind) = error_kind {
            *counters.errors_by_kind.entry(kind.to_string()).or_default() += 1;
        }
    }

    /// Takes a consistent snapshot of every counter.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let totals = &counters.totals;

        MetricsSnapshot {
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            request_count: totals.calls,
            error_count: totals.errors,
            error_rate: if totals.calls == 0 {
                0.0
            } else {
                totals.errors as f64 / totals.calls as f64
            },
            average_response_ms: totals.average_ms(),
            response_ms: percentiles(&counters.recent),
            requests_by_method: counters.by_method.clone(),
            errors_by_kind: counters.errors_by_kind.clone(),
            tools: counters.tools.clone(),
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentiles(samples: &VecDeque<f64>) -> Percentiles {
    if samples.is_empty() {
        return Percentiles::default();
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let at = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(sorted.len() - 1)];
    Percentiles {
        p50: at(0.5),
        p90: at(0.9),
        p99: at(0.99),
    }
}
