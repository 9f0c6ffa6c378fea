//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use scm_models::{QueueName, TranscriptionProvider};

/// Where `vpsPath` files are fetched from.
#[derive(Clone, PartialEq, Eq)]
pub enum TransferBackend {
    /// VPS volume mounted locally; `vpsPath` is a local path
    Local,
    /// FTP server; `vpsPath` is resolved against the FTP root
    Ftp {
        host: String,
        port: u16,
        user: String,
        password: String,
    },
}

impl std::fmt::Debug for TransferBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("Local"),
            Self::Ftp { host, port, user, .. } => f
                .debug_struct("Ftp")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .field("password", &"***")
                .finish(),
        }
    }
}

impl TransferBackend {
    fn from_env() -> Self {
        match std::env::var("TRANSFER_BACKEND").as_deref() {
            Ok("ftp") => Self::Ftp {
                host: std::env::var("FTP_HOST").unwrap_or_default(),
                port: env_parse("FTP_PORT").unwrap_or(21),
                user: std::env::var("FTP_USER").unwrap_or_else(|_| "anonymous".to_string()),
                password: std::env::var("FTP_PASSWORD").unwrap_or_default(),
            },
            _ => Self::Local,
        }
    }
}

/// One transcription provider endpoint.
#[derive(Clone)]
pub struct ProviderEndpoint {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ProviderEndpoint {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn from_env(prefix: &str, default: Self) -> Self {
        Self {
            api_key: std::env::var(format!("{}_API_KEY", prefix))
                .ok()
                .filter(|k| !k.is_empty()),
            base_url: std::env::var(format!("{}_BASE_URL", prefix)).unwrap_or(default.base_url),
            model: std::env::var(format!("{}_MODEL", prefix)).unwrap_or(default.model),
        }
    }
}

/// Transcription provider settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider for transcribe jobs created by the FTP stage
    pub default_provider: TranscriptionProvider,
    pub groq: ProviderEndpoint,
    pub assemblyai: ProviderEndpoint,
    pub deepseek: ProviderEndpoint,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Delay between AssemblyAI status polls
    pub poll_interval: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_provider: TranscriptionProvider::Groq,
            groq: ProviderEndpoint::new("https://api.groq.com/openai/v1", "whisper-large-v3"),
            assemblyai: ProviderEndpoint::new("https://api.assemblyai.com", "best"),
            deepseek: ProviderEndpoint::new("https://api.deepseek.com/v1", "whisper-1"),
            http_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(3),
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_provider: env_parse("DEFAULT_TRANSCRIBE_PROVIDER")
                .unwrap_or(defaults.default_provider),
            groq: ProviderEndpoint::from_env("GROQ", defaults.groq),
            assemblyai: ProviderEndpoint::from_env("ASSEMBLYAI", defaults.assemblyai),
            deepseek: ProviderEndpoint::from_env("DEEPSEEK", defaults.deepseek),
            http_timeout: env_parse("TRANSCRIBE_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            poll_interval: env_parse("ASSEMBLYAI_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
    }

    pub fn endpoint(&self, provider: TranscriptionProvider) -> &ProviderEndpoint {
        match provider {
            TranscriptionProvider::Groq => &self.groq,
            TranscriptionProvider::AssemblyAi => &self.assemblyai,
            TranscriptionProvider::Deepseek => &self.deepseek,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed at once per queue
    pub concurrency: usize,
    /// Sleep between claims when a queue is empty
    pub poll_interval: Duration,
    /// Lock TTL of an active job; renewed every half of it
    pub lock_duration: Duration,
    /// How often each worker looks for jobs with expired locks
    pub stalled_interval: Duration,
    /// Times a job may stall before it is failed
    pub max_stalled: u32,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    pub ftp_timeout: Duration,
    pub transcribe_timeout: Duration,
    pub transcode_timeout: Duration,
    /// Transferred media land in `<media_dir>/<mediaFileId>/`
    pub media_dir: PathBuf,
    /// Exports land in `<export_dir>/<exportId>/`
    pub export_dir: PathBuf,
    /// Public base URL serving `export_dir`
    pub cdn_base_url: Option<String>,
    pub transfer: TransferBackend,
    pub providers: ProviderConfig,
    /// Port for the Prometheus exporter, disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_millis(1000),
            lock_duration: Duration::from_secs(30),
            stalled_interval: Duration::from_secs(30),
            max_stalled: 1,
            shutdown_timeout: Duration::from_secs(30),
            ftp_timeout: Duration::from_secs(600),
            transcribe_timeout: Duration::from_secs(900),
            transcode_timeout: Duration::from_secs(3600),
            media_dir: PathBuf::from("/tmp/scm/media"),
            export_dir: PathBuf::from("/tmp/scm/exports"),
            cdn_base_url: None,
            transfer: TransferBackend::Local,
            providers: ProviderConfig::default(),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            env_parse(key).map(Duration::from_secs).unwrap_or(default)
        };

        Self {
            concurrency: env_parse("WORKER_CONCURRENCY")
                .unwrap_or(defaults.concurrency)
                .max(1),
            poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            lock_duration: secs("WORKER_LOCK_DURATION_SECS", defaults.lock_duration),
            stalled_interval: secs("WORKER_STALLED_INTERVAL_SECS", defaults.stalled_interval),
            max_stalled: env_parse("WORKER_MAX_STALLED").unwrap_or(defaults.max_stalled),
            shutdown_timeout: secs("WORKER_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
            ftp_timeout: secs("WORKER_FTP_TIMEOUT_SECS", defaults.ftp_timeout),
            transcribe_timeout: secs("WORKER_TRANSCRIBE_TIMEOUT_SECS", defaults.transcribe_timeout),
            transcode_timeout: secs("WORKER_TRANSCODE_TIMEOUT_SECS", defaults.transcode_timeout),
            media_dir: std::env::var("MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_dir),
            export_dir: std::env::var("EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            cdn_base_url: std::env::var("CDN_BASE_URL").ok().filter(|s| !s.is_empty()),
            transfer: TransferBackend::from_env(),
            providers: ProviderConfig::from_env(),
            metrics_port: env_parse("WORKER_METRICS_PORT"),
        }
    }

    /// Time a single attempt of the queue's stage may take.
    pub fn stage_timeout(&self, queue: QueueName) -> Duration {
        match queue {
            QueueName::FtpTransfer => self.ftp_timeout,
            QueueName::Transcribe => self.transcribe_timeout,
            QueueName::Transcode => self.transcode_timeout,
        }
    }

    /// Lock renewal period.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.lock_duration / 2).max(Duration::from_millis(10))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
