//! Media pipeline worker binary.

use tracing::{error, info, warn};

use scm_queue::{QueueConfig, SharedRegistry};
use scm_worker::{init_tracing, metrics, WorkerConfig, WorkerSupervisor};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting scm-worker");

    let queue_config = match QueueConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid queue configuration: {}", e);
            std::process::exit(1);
        }
    };

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match metrics::init_metrics(port) {
            Ok(()) => info!("Metrics exporter listening on port {}", port),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    if let Err(e) = scm_media::check_ffmpeg() {
        warn!("Transcode jobs will fail until ffmpeg is installed: {}", e);
    }

    let shutdown_timeout = config.shutdown_timeout;
    let supervisor = match WorkerSupervisor::new(SharedRegistry::new(queue_config), config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create worker supervisor: {}", e);
            std::process::exit(1);
        }
    };

    let handles = match supervisor.start_workers().await {
        Ok(h) => h,
        Err(e) => {
            error!("Failed to start workers: {}", e);
            std::process::exit(1);
        }
    };

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    if tokio::time::timeout(shutdown_timeout, handles.shutdown_and_wait())
        .await
        .is_err()
    {
        warn!("Workers did not stop within {:?}", shutdown_timeout);
    }

    info!("Worker shutdown complete");
}
