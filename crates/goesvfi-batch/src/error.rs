use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Failed to install log subscriber: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to read queue state '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write queue state '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt queue state '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize queue state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum QueueError {
    /// A job with this id is already in the job table. Duplicates are
    /// rejected rather than overwritten.
    #[error("Job '{0}' already exists in the queue")]
    DuplicateJob(String),

    /// The state file stores paths as strings, so they must be UTF-8.
    #[error("Job '{job_id}' has a path that is not valid UTF-8: {}", path.display())]
    InvalidPath { job_id: String, path: PathBuf },

    #[error("Failed to spawn queue thread: {0}")]
    SpawnFailed(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Input directory not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

pub type Result<T> = std::result::Result<T, BatchError>;
