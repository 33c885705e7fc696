pub mod job_queue;
pub mod ordering;
pub mod store;

pub use job_queue::{JobQueue, JobQueueBuilder, QueueStats};
pub use ordering::compare_jobs;
pub use store::{PersistedQueue, QueueStore};
