//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_ADMITTED_TOTAL: &str = "rmix_jobs_admitted_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "rmix_jobs_skipped_total";
    pub const JOBS_FINISHED_TOTAL: &str = "rmix_jobs_finished_total";
    pub const JOBS_RETRIED_TOTAL: &str = "rmix_jobs_retried_total";
    pub const JOB_DURATION_SECONDS: &str = "rmix_job_duration_seconds";
}

/// Serve metrics on `addr` in the Prometheus text format.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn record_jobs_admitted(count: usize) {
    counter!(names::JOBS_ADMITTED_TOTAL).increment(count as u64);
}

pub fn record_jobs_skipped(count: usize) {
    counter!(names::JOBS_SKIPPED_TOTAL).increment(count as u64);
}

/// Record a job reaching a terminal state.
pub fn record_job_finished(outcome: &'static str, duration_secs: f64) {
    counter!(names::JOBS_FINISHED_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

pub fn record_job_retried() {
    counter!(names::JOBS_RETRIED_TOTAL).increment(1);
}
