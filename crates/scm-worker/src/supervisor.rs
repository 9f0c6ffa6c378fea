//! Starts the three stage workers exactly once per process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use scm_models::QueueName;
use scm_queue::SharedRegistry;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::executor::StageWorker;
use crate::stages::StageContext;
use crate::transcribe::{HttpTranscriber, Transcriber};

/// Running workers.
pub struct WorkerHandles {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(QueueName, JoinHandle<()>)>,
}

impl WorkerHandles {
    /// Ask every worker to stop claiming jobs.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for every worker loop to exit.
    pub async fn join(self) {
        for (queue, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(queue = %queue, "Worker task ended abnormally: {}", e);
            }
        }
    }

    pub async fn shutdown_and_wait(self) {
        self.shutdown();
        self.join().await;
    }

    pub fn queues(&self) -> Vec<QueueName> {
        self.tasks.iter().map(|(q, _)| *q).collect()
    }
}

/// Owns the started flag; share one per process.
pub struct WorkerSupervisor {
    registry: SharedRegistry,
    config: Arc<WorkerConfig>,
    transcriber: Arc<dyn Transcriber>,
    started: AtomicBool,
}

impl WorkerSupervisor {
    pub fn new(registry: SharedRegistry, config: WorkerConfig) -> WorkerResult<Self> {
        let transcriber = Arc::new(HttpTranscriber::new(config.providers.clone())?);
        Ok(Self::with_transcriber(registry, config, transcriber))
    }

    pub fn with_transcriber(
        registry: SharedRegistry,
        config: WorkerConfig,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            registry,
            config: Arc::new(config),
            transcriber,
            started: AtomicBool::new(false),
        }
    }

    /// Spawn one consumer loop per queue.
    ///
    /// Only the first call starts anything; later calls return
    /// [`WorkerError::AlreadyStarted`].
    pub async fn start_workers(&self) -> WorkerResult<WorkerHandles> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        let registry = match self.registry.get().await {
            Ok(registry) => registry,
            Err(e) => {
                // Allow a later call to retry the connection.
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let ctx = StageContext {
            registry,
            config: Arc::clone(&self.config),
            transcriber: Arc::clone(&self.transcriber),
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = QueueName::ALL
            .into_iter()
            .map(|name| {
                let worker = Arc::new(StageWorker::new(name, ctx.clone()));
                (name, tokio::spawn(worker.run(shutdown_rx.clone())))
            })
            .collect();

        info!("Started workers for {:?}", QueueName::ALL.map(|q| q.as_str()));
        Ok(WorkerHandles { shutdown, tasks })
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
