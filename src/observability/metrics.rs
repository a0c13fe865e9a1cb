//! # Metrics Collection
//!
//! Prometheus counters for job throughput, key rotations and replication
//! checks. Recording is always safe: without an installed exporter the
//! `metrics` macros are no-ops.

use crate::config::ObservabilityConfig;
use crate::errors::{FleetError, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Record a job accepted by the executor
pub fn record_job_submitted(kind: &str) {
    counter!("dirfleet_jobs_submitted_total", "kind" => kind.to_string()).increment(1);
}

/// Record a job reaching a terminal state
pub fn record_job_completed(kind: &str, state: &str, duration_seconds: f64) {
    counter!(
        "dirfleet_jobs_completed_total",
        "kind" => kind.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
    histogram!("dirfleet_job_duration_seconds", "kind" => kind.to_string())
        .record(duration_seconds);
}

/// Record a key rotation attempt outcome (`rotated`, `skipped`, `failed`, `busy`)
pub fn record_key_rotation(outcome: &str) {
    counter!("dirfleet_key_rotations_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record one provider/consumer replication check
pub fn record_replication_check(passed: bool) {
    let result = if passed { "pass" } else { "fail" };
    counter!("dirfleet_replication_checks_total", "result" => result).increment(1);
}

fn describe_metrics() {
    describe_counter!("dirfleet_jobs_submitted_total", Unit::Count, "Jobs accepted by the executor");
    describe_counter!(
        "dirfleet_jobs_completed_total",
        Unit::Count,
        "Jobs that reached a terminal state"
    );
    describe_histogram!("dirfleet_job_duration_seconds", Unit::Seconds, "Job run time");
    describe_counter!("dirfleet_key_rotations_total", Unit::Count, "Key rotation outcomes");
    describe_counter!(
        "dirfleet_replication_checks_total",
        Unit::Count,
        "Provider/consumer replication checks"
    );
}

/// Install the Prometheus exporter when metrics are enabled
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            if config.enable_metrics {
                warn!("Metrics disabled: no bind address configured");
            }
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        FleetError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", "dirfleet")
        .install()
        .map_err(|e| FleetError::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    describe_metrics();
    info!(metrics_addr = %metrics_addr, "Metrics collection initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        record_job_submitted("provision");
        record_job_completed("provision", "success", 1.5);
        record_key_rotation("skipped");
        record_replication_check(true);
    }

    #[test]
    fn test_init_metrics_disabled() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_metrics(&config).is_ok());
    }
}
