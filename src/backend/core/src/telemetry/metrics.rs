//! Prometheus metrics for recovery sessions, diagnostics and remediation.
//!
//! # Example
//!
//! ```rust,no_run
//! use portguard_core::telemetry::metrics::RecoveryMetrics;
//!
//! RecoveryMetrics::session_started(false);
//! RecoveryMetrics::remediation("ReleasePort", true);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metric_descriptions();

    let _ = PROMETHEUS_HANDLE.set(handle.clone());
    Ok(handle)
}

/// Render all metrics in Prometheus text format; empty before [`init_metrics`].
pub fn render() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_default()
}

fn register_metric_descriptions() {
    describe_counter!("portguard_sessions_total", "Recovery sessions started");
    describe_counter!(
        "portguard_sessions_finished_total",
        "Recovery sessions finished, by final state"
    );
    describe_histogram!(
        "portguard_session_duration_seconds",
        "Wall time of a recovery session"
    );
    describe_counter!(
        "portguard_diagnostic_errors_total",
        "Problems reported by the diagnostics engine"
    );
    describe_counter!(
        "portguard_remediation_total",
        "Remediation actions executed, by outcome"
    );
    describe_counter!("portguard_errors_total", "Errors raised, by code");
    describe_gauge!("portguard_services_online", "Services reachable at last check");
    describe_gauge!("portguard_sse_subscribers", "Connected event stream subscribers");
}

/// Recording helpers used by the orchestrator.
pub struct RecoveryMetrics;

impl RecoveryMetrics {
    pub fn session_started(test_mode: bool) {
        counter!("portguard_sessions_total", "test_mode" => test_mode.to_string()).increment(1);
    }

    pub fn session_finished(state: &str, elapsed: Duration) {
        counter!("portguard_sessions_finished_total", "state" => state.to_string()).increment(1);
        histogram!("portguard_session_duration_seconds").record(elapsed.as_secs_f64());
    }

    pub fn diagnostic_error(kind: &str, severity: &str) {
        counter!(
            "portguard_diagnostic_errors_total",
            "kind" => kind.to_string(),
            "severity" => severity.to_string(),
        )
        .increment(1);
    }

    pub fn remediation(action: &str, succeeded: bool) {
        let outcome = if succeeded { "succeeded" } else { "failed" };
        counter!(
            "portguard_remediation_total",
            "action" => action.to_string(),
            "outcome" => outcome,
        )
        .increment(1);
    }

    pub fn services_online(count: usize) {
        gauge!("portguard_services_online").set(count as f64);
    }

    pub fn subscribers(count: usize) {
        gauge!("portguard_sse_subscribers").set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        RecoveryMetrics::session_started(true);
        RecoveryMetrics::remediation("RestartService", false);
        RecoveryMetrics::session_finished("completed", Duration::from_millis(40));
    }
}
