//! Worker metrics.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use scm_models::QueueName;

use crate::error::{WorkerError, WorkerResult};

pub mod names {
    pub const JOBS_COMPLETED: &str = "scm_jobs_completed_total";
    pub const JOBS_FAILED: &str = "scm_jobs_failed_total";
    pub const JOB_DURATION: &str = "scm_job_duration_seconds";
}

/// Serve Prometheus metrics on `0.0.0.0:<port>`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("failed to install metrics exporter: {}", e)))?;

    describe_counter!(names::JOBS_COMPLETED, "Jobs completed per queue");
    describe_counter!(names::JOBS_FAILED, "Failed attempts per queue");
    describe_histogram!(names::JOB_DURATION, "Stage attempt duration in seconds");
    Ok(())
}

pub fn record_completed(queue: QueueName) {
    counter!(names::JOBS_COMPLETED, "queue" => queue.as_str()).increment(1);
}

pub fn record_failed(queue: QueueName, permanent: bool) {
    counter!(
        names::JOBS_FAILED,
        "queue" => queue.as_str(),
        "permanent" => if permanent { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_duration(queue: QueueName, elapsed: Duration) {
    histogram!(names::JOB_DURATION, "queue" => queue.as_str()).record(elapsed.as_secs_f64());
}
