//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    enqueue_transcode, enqueue_transcribe, enqueue_transfer, get_job_status, get_queues_health,
    health, missing_job_id_handler, ready,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let processing_routes = Router::new()
        .route("/status", get(missing_job_id_handler))
        .route("/status/", get(missing_job_id_handler))
        .route("/status/:job_id", get(get_job_status))
        .route("/transfer", post(enqueue_transfer))
        .route("/transcribe", post(enqueue_transcribe))
        .route("/transcode", post(enqueue_transcode))
        .route("/queues", get(get_queues_health));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api/processing", processing_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::ApiConfig;
    use scm_models::{OutputFormat, TranscodeJob};
    use scm_queue::{JobOptions, QueueRegistry};

    fn app(registry: QueueRegistry) -> Router {
        create_router(AppState::with_registry(ApiConfig::default(), registry), None)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_without_job_id_is_bad_request() {
        for uri in ["/api/processing/status/", "/api/processing/status", "/api/processing/status/%20"] {
            let (status, body) = send(app(QueueRegistry::in_memory()), get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body, json!({ "error": "jobId is required" }));
        }
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (status, body) = send(
            app(QueueRegistry::in_memory()),
            get("/api/processing/status/nope"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Job not found" }));
    }

    #[tokio::test]
    async fn enqueued_transfer_is_visible_in_status() {
        let registry = QueueRegistry::in_memory();
        let (status, body) = send(
            app(registry.clone()),
            post_json(
                "/api/processing/transfer",
                json!({ "mediaFileId": "m1", "vpsPath": "/tmp/m1.wav", "filename": "m1.wav" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["queue"], "ftp-transfer");
        let job_id = body["jobId"].as_str().unwrap().to_string();

        let (status, body) = send(
            app(registry),
            get(&format!("/api/processing/status/{}", job_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobId"], job_id.as_str());
        assert_eq!(body["queue"], "ftp-transfer");
        assert_eq!(body["state"], "waiting");
        assert_eq!(body["progress"], 0);
        assert_eq!(body["data"]["mediaFileId"], "m1");
    }

    #[tokio::test]
    async fn failed_transcode_reports_reason_without_result() {
        let registry = QueueRegistry::in_memory();
        let queue = registry.transcode();
        let id = queue
            .add_with(
                &TranscodeJob::new("c1", "e1", OutputFormat::Mp4, 1080, 1920),
                JobOptions::default().with_attempts(1),
            )
            .await
            .unwrap();
        let job = queue.claim("w1", Duration::from_secs(30)).await.unwrap().unwrap();
        queue.fail(&job.id, "w1", "ffmpeg exited with code 1").await.unwrap();

        let (status, body) = send(
            app(registry),
            get(&format!("/api/processing/status/{}", id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queue"], "transcode");
        assert_eq!(body["state"], "failed");
        assert_eq!(body["failedReason"], "ffmpeg exited with code 1");
        assert!(body.get("result").is_none());
    }

    #[tokio::test]
    async fn invalid_transcode_payload_is_rejected() {
        let registry = QueueRegistry::in_memory();
        let (status, body) = send(
            app(registry.clone()),
            post_json(
                "/api/processing/transcode",
                json!({
                    "clipId": "c1",
                    "exportId": "e1",
                    "format": "mp4",
                    "width": 1081,
                    "height": 1920
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert_eq!(registry.transcode().job_counts().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn transfer_body_missing_a_field_is_bad_request_json() {
        let registry = QueueRegistry::in_memory();
        let (status, body) = send(
            app(registry.clone()),
            post_json(
                "/api/processing/transfer",
                json!({ "mediaFileId": "m1", "vpsPath": "/tmp/m1.wav" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error = body["error"].as_str().unwrap();
        assert!(error.contains("filename"), "{}", error);
        assert_eq!(registry.ftp_transfer().job_counts().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn unparseable_or_untyped_bodies_are_bad_request_json() {
        let broken = Request::builder()
            .method("POST")
            .uri("/api/processing/transcribe")
            .header("content-type", "application/json")
            .body(Body::from("{\"mediaFileId\": "))
            .unwrap();
        let untyped = Request::builder()
            .method("POST")
            .uri("/api/processing/transcribe")
            .body(Body::from(r#"{"mediaFileId":"m1","audioPath":"/a.wav","provider":"groq"}"#))
            .unwrap();

        for request in [broken, untyped] {
            let (status, body) = send(app(QueueRegistry::in_memory()), request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn queues_health_lists_every_queue() {
        let registry = QueueRegistry::in_memory();
        registry
            .enqueue(&TranscodeJob::new("c1", "e1", OutputFormat::Webm, 720, 1280))
            .await
            .unwrap();

        let (status, body) = send(app(registry), get("/api/processing/queues")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transcode"]["waiting"], 1);
        assert_eq!(body["ftp-transfer"]["waiting"], 0);
        assert_eq!(body["transcribe"]["active"], 0);
    }

    #[tokio::test]
    async fn ready_pings_the_store() {
        let (status, body) = send(app(QueueRegistry::in_memory()), get("/ready")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["redis"]["status"], "ok");
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let response = app(QueueRegistry::in_memory())
            .oneshot(get("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }
}
