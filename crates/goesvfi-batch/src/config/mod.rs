pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, validate_config};
pub use schema::{
    default_queue_path, LogFormat, LoggingConfig, QueueConfig, QUEUE_FILE_NAME, QUEUE_PATH_ENV,
};
