//! Prometheus metrics for the worker.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metric names as constants for consistency.
pub mod names {
    pub const STAGE_ATTEMPTS_TOTAL: &str = "reel_stage_attempts_total";
    pub const STAGE_ATTEMPT_DURATION_SECONDS: &str = "reel_stage_attempt_duration_seconds";
    pub const STAGE_DURATION_SECONDS: &str = "reel_stage_duration_seconds";
    pub const RUNS_TOTAL: &str = "reel_runs_total";
    pub const RUNS_ACTIVE: &str = "reel_runs_active";
    pub const TRIGGERS_TOTAL: &str = "reel_scheduler_triggers_total";
    pub const VISUALS_DEGRADED_TOTAL: &str = "reel_visuals_degraded_total";
}

/// Install the Prometheus recorder with an HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

/// Record a finished run.
pub fn record_run_outcome(outcome: &'static str) {
    metrics::counter!(names::RUNS_TOTAL, "outcome" => outcome).increment(1);
}
