//! Axum HTTP API server.
//!
//! This crate provides:
//! - Processing status lookup across the pipeline queues
//! - Producer endpoints enqueueing stage jobs
//! - Liveness, readiness and queue health endpoints
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiJson, ApiResult};
pub use routes::create_router;
pub use state::AppState;
