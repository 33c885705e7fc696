use std::sync::Arc;

use crate::queue::job_queue::QueueShared;

/// Capability handed to the process function for reporting 0-100 progress.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: f64);
}

/// No-op reporter for unit tests and direct calls outside a queue.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _percent: f64) {}
}

/// Records progress on the owning queue's job and emits `job_progress`.
pub(crate) struct QueueProgress {
    shared: Arc<QueueShared>,
    job_id: String,
}

impl QueueProgress {
    pub fn new(shared: Arc<QueueShared>, job_id: &str) -> Self {
        Self {
            shared,
            job_id: job_id.to_string(),
        }
    }
}

impl ProgressReporter for QueueProgress {
    fn report(&self, percent: f64) {
        self.shared.record_progress(&self.job_id, percent);
    }
}
