//! Metric names and recording helpers.
//!
//! The engine only records through the `metrics` facade; installing an
//! exporter is left to the embedding application.

use std::time::Duration;

/// Units of work run, labelled by kind and outcome
pub const WORK_EXECUTED: &str = "runnel_work_executed_total";

/// Time spent running a unit of work, in milliseconds
pub const WORK_DURATION_MS: &str = "runnel_work_duration_ms";

/// Units of work re-enqueued after losing a commit race
pub const WORK_RETRIED: &str = "runnel_work_retried_total";

/// Flow nodes marked failed
pub const FLOW_NODES_FAILED: &str = "runnel_flow_nodes_failed_total";

/// Message couples matched by sweeps
pub const MESSAGES_MATCHED: &str = "runnel_messages_matched_total";

/// Record a finished unit of work
pub fn record_work(kind: &'static str, outcome: &'static str, elapsed: Duration) {
    ::metrics::increment_counter!(WORK_EXECUTED, "kind" => kind, "outcome" => outcome);
    ::metrics::histogram!(WORK_DURATION_MS, elapsed.as_secs_f64() * 1000.0, "kind" => kind);
}

/// Record a retried unit of work
pub fn record_retry(kind: &'static str) {
    ::metrics::increment_counter!(WORK_RETRIED, "kind" => kind);
}

/// Record a flow node marked failed
pub fn record_flow_node_failed(scope: &str) {
    ::metrics::increment_counter!(FLOW_NODES_FAILED, "scope" => scope.to_string());
}

/// Record matched message couples
pub fn record_messages_matched(count: usize) {
    ::metrics::counter!(MESSAGES_MATCHED, count as u64);
}
