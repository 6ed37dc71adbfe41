//! Metrics emitted by the pollers
//!
//! The pollers only call into [`MetricsSink`]; exporting is left to the
//! embedding process. [`InMemoryMetrics`] keeps everything in memory and is
//! what the tests assert against.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

// Decision poller
pub const DECISION_POLL_COUNTER: &str = "decision_poll_total";
pub const DECISION_POLL_SUCCEED_COUNTER: &str = "decision_poll_succeed";
pub const DECISION_POLL_NO_TASK_COUNTER: &str = "decision_poll_no_task";
pub const DECISION_POLL_FAILED_COUNTER: &str = "decision_poll_failed";
pub const DECISION_POLL_TRANSIENT_FAILED_COUNTER: &str = "decision_poll_transient_failed";
pub const DECISION_POLL_LATENCY: &str = "decision_poll_latency";
pub const DECISION_EXECUTION_FAILED_COUNTER: &str = "decision_execution_failed";
pub const DECISION_EXECUTION_LATENCY: &str = "decision_execution_latency";
pub const DECISION_RESPONSE_FAILED_COUNTER: &str = "decision_response_failed";
pub const DECISION_RESPONSE_LATENCY: &str = "decision_response_latency";
pub const DECISION_END_TO_END_LATENCY: &str = "decision_endtoend_latency";
pub const DECISION_TASK_COMPLETED_COUNTER: &str = "decision_task_completed";
pub const QUERY_TASK_COMPLETED_COUNTER: &str = "query_task_completed";

// Activity poller
pub const ACTIVITY_POLL_COUNTER: &str = "activity_poll_total";
pub const ACTIVITY_POLL_SUCCEED_COUNTER: &str = "activity_poll_succeed";
pub const ACTIVITY_POLL_NO_TASK_COUNTER: &str = "activity_poll_no_task";
pub const ACTIVITY_POLL_FAILED_COUNTER: &str = "activity_poll_failed";
pub const ACTIVITY_POLL_TRANSIENT_FAILED_COUNTER: &str = "activity_poll_transient_failed";
pub const ACTIVITY_POLL_LATENCY: &str = "activity_poll_latency";
pub const ACTIVITY_EXECUTION_FAILED_COUNTER: &str = "activity_execution_failed";
pub const ACTIVITY_EXECUTION_LATENCY: &str = "activity_execution_latency";
pub const ACTIVITY_RESPONSE_FAILED_COUNTER: &str = "activity_response_failed";
pub const ACTIVITY_RESPONSE_LATENCY: &str = "activity_response_latency";
pub const ACTIVITY_END_TO_END_LATENCY: &str = "activity_endtoend_latency";
pub const ACTIVITY_TASK_COMPLETED_COUNTER: &str = "activity_task_completed";
pub const ACTIVITY_TASK_FAILED_COUNTER: &str = "activity_task_failed";
pub const ACTIVITY_TASK_CANCELED_COUNTER: &str = "activity_task_canceled";

// History
pub const WORKFLOW_GET_HISTORY_COUNTER: &str = "workflow_get_history_total";
pub const WORKFLOW_GET_HISTORY_SUCCEED_COUNTER: &str = "workflow_get_history_succeed";
pub const WORKFLOW_GET_HISTORY_FAILED_COUNTER: &str = "workflow_get_history_failed";
pub const WORKFLOW_GET_HISTORY_LATENCY: &str = "workflow_get_history_latency";

/// Receives counters and timers from the pollers
pub trait MetricsSink: Send + Sync {
    /// Add `value` to a counter
    fn incr_counter(&self, name: &'static str, value: u64);

    /// Record one latency sample
    fn record_timer(&self, name: &'static str, duration: Duration);
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &'static str, _value: u64) {}

    fn record_timer(&self, _name: &'static str, _duration: Duration) {}
}

/// Sink that keeps counters and timer samples in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<&'static str, u64>>,
    timers: Mutex<HashMap<&'static str, Vec<Duration>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented)
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Number of samples recorded for a timer
    pub fn timer_count(&self, name: &str) -> usize {
        self.timers.lock().get(name).map_or(0, Vec::len)
    }

    /// All samples recorded for a timer
    pub fn timer_samples(&self, name: &str) -> Vec<Duration> {
        self.timers.lock().get(name).cloned().unwrap_or_default()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_counter(&self, name: &'static str, value: u64) {
        *self.counters.lock().entry(name).or_insert(0) += value;
    }

    fn record_timer(&self, name: &'static str, duration: Duration) {
        self.timers.lock().entry(name).or_default().push(duration);
    }
}
