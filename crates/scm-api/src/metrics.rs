//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use scm_models::{QueueName, QueuesHealth};

/// Install the Prometheus recorder and return the handle rendering `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "scm_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "scm_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "scm_http_requests_in_flight";

    pub const JOBS_ENQUEUED_TOTAL: &str = "scm_jobs_enqueued_total";
    pub const QUEUE_JOBS: &str = "scm_queue_jobs";
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_enqueued(queue: QueueName) {
    counter!(names::JOBS_ENQUEUED_TOTAL, "queue" => queue.as_str()).increment(1);
}

/// Publish the latest per-queue counts as gauges.
pub fn set_queue_counts(health: &QueuesHealth) {
    for (queue, counts) in health {
        for (state, value) in [
            ("waiting", counts.waiting),
            ("active", counts.active),
            ("delayed", counts.delayed),
            ("completed", counts.completed),
            ("failed", counts.failed),
        ] {
            gauge!(names::QUEUE_JOBS, "queue" => queue.as_str(), "state" => state).set(value as f64);
        }
    }
}

/// Collapse job ids so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    const STATUS_PREFIX: &str = "/api/processing/status/";
    match path.strip_prefix(STATUS_PREFIX) {
        Some(rest) if !rest.is_empty() => format!("{}:jobId", STATUS_PREFIX),
        _ => path.to_string(),
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/processing/status/550e8400-e29b-41d4-a716-446655440000"),
            "/api/processing/status/:jobId"
        );
        assert_eq!(sanitize_path("/api/processing/status/"), "/api/processing/status/");
        assert_eq!(sanitize_path("/api/processing/queues"), "/api/processing/queues");
    }
}
