//! Media pipeline workers.
//!
//! This crate provides:
//! - One consumer loop per queue (ftp-transfer, transcribe, transcode)
//! - Lock heartbeats and stalled job recovery
//! - Stage implementations and transcription provider clients
//! - Idempotent worker startup

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod stages;
pub mod supervisor;
pub mod transcribe;
pub mod transfer;

pub use config::{ProviderConfig, ProviderEndpoint, TransferBackend, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::StageWorker;
pub use logging::JobLogger;
pub use scm_queue::init_tracing;
pub use stages::StageContext;
pub use supervisor::{WorkerHandles, WorkerSupervisor};
pub use transcribe::{HttpTranscriber, Transcriber, Transcript};
