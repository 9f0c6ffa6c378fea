//! Application state.

use std::sync::Arc;

use scm_queue::{QueueConfig, QueueRegistry, SharedRegistry};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    /// Connected on first use
    pub queues: SharedRegistry,
}

impl AppState {
    pub fn new(config: ApiConfig, queue_config: QueueConfig) -> Self {
        Self {
            config: Arc::new(config),
            queues: SharedRegistry::new(queue_config),
        }
    }

    /// State over an already built registry.
    pub fn with_registry(config: ApiConfig, registry: QueueRegistry) -> Self {
        Self {
            config: Arc::new(config),
            queues: SharedRegistry::from_registry(registry),
        }
    }
}
