pub mod batch;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod queue;
pub mod sanitize;
pub mod worker;

pub use batch::BatchProcessor;
pub use broadcast::{EventEmitter, EventKind, QueueEvent, SubscriptionId};
pub use config::{load_config, LogFormat, LoggingConfig, QueueConfig};
pub use error::{
    BatchError, ConfigError, PersistenceError, QueueError, Result, WorkerError,
};
pub use job::{Job, JobPriority, JobSettings, JobStatus};
pub use logging::init_logging;
pub use queue::{JobQueue, JobQueueBuilder, QueueStats, QueueStore};
pub use worker::{
    processor_fn, JobProcessor, NoopProgress, ProcessError, ProgressReporter, ResourceGuard,
};
