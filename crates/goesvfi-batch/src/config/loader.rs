use std::path::Path;

use crate::config::schema::QueueConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<QueueConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<QueueConfig, ConfigError> {
    let config: QueueConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_jobs == 0 {
        return Err(ConfigError::Validation {
            message: "max_concurrent_jobs must be at least 1".to_string(),
        });
    }

    if config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "poll_interval_ms must be at least 1".to_string(),
        });
    }

    if config.event_channel_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "event_channel_capacity must be at least 1".to_string(),
        });
    }

    if let Some(path) = &config.persistence_path {
        if path.as_os_str().is_empty() || path.file_name().is_none() {
            return Err(ConfigError::Validation {
                message: format!("persistence_path '{}' is not a file path", path.display()),
            });
        }
    }

    if let Err(e) = config.logging.filter.parse::<tracing_subscriber::EnvFilter>() {
        return Err(ConfigError::Validation {
            message: format!("Invalid log filter '{}': {}", config.logging.filter, e),
        });
    }

    Ok(())
}
