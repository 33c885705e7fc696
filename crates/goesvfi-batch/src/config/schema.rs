use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable that overrides the state file location.
pub const QUEUE_PATH_ENV: &str = "GOESVFI_BATCH_QUEUE_PATH";

/// Application directory under the user config dir.
pub const APP_DIR_NAME: &str = "goesvfi";

/// File name of the persisted queue.
pub const QUEUE_FILE_NAME: &str = "batch_queue.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Explicit state file. `None` means `<config dir>/goesvfi/batch_queue.json`.
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long `stop()` waits for running jobs before giving up on them.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_stop_timeout_secs() -> u64 {
    5
}

fn default_event_channel_capacity() -> usize {
    256
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            persistence_path: None,
            poll_interval_ms: default_poll_interval_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Resolves the state file: environment override, then the configured
    /// path, then the platform default.
    pub fn resolve_persistence_path(&self) -> PathBuf {
        if let Some(path) = std::env::var_os(QUEUE_PATH_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(path);
        }
        self.persistence_path
            .clone()
            .unwrap_or_else(default_queue_path)
    }
}

/// `<user config dir>/goesvfi/batch_queue.json`, or `./batch_queue.json`
/// when the platform has no config directory.
pub fn default_queue_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join(APP_DIR_NAME).join(QUEUE_FILE_NAME),
        None => {
            log::warn!(
                "No user config directory available, keeping queue state in the working directory"
            );
            PathBuf::from(QUEUE_FILE_NAME)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_filter() -> String {
    "goesvfi_batch=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::Text,
        }
    }
}
