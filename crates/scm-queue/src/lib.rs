//! Pipeline queues for the media processing workers.
//!
//! This crate provides:
//! - Three named queues (ftp-transfer, transcribe, transcode) sharing one policy
//! - Exponential retry backoff and terminal-bucket retention
//! - Lock-based ownership of active jobs with stalled-job recovery
//! - Redis and in-memory backing stores
//! - Status lookup by job id and per-queue health counts
//! - Tracing setup shared by every binary

pub mod config;
pub mod error;
pub mod health;
pub mod job;
pub mod logging;
pub mod memory_store;
pub mod policy;
pub mod queue;
pub mod redis_store;
pub mod status;
pub mod store;

pub use config::{QueueConfig, MEMORY_URL};
pub use error::{QueueError, QueueResult};
pub use health::{clean_queue, pending_total, queues_health, CleanReport};
pub use job::{now_ms, Job};
pub use logging::init_tracing;
pub use memory_store::MemoryStore;
pub use policy::{Backoff, JobOptions, JobPolicy, Retention};
pub use queue::{Queue, QueueRegistry, SharedRegistry};
pub use redis_store::RedisStore;
pub use status::{find_status, get_status};
pub use store::{FailOutcome, JobStore, StalledReport, STALLED_REASON};
