//! Optional resource limiter consulted around each execution.

use crate::job::Job;
use crate::worker::executor::ProcessError;

/// Acquired before the process function runs and released afterwards.
///
/// A failed `acquire` fails the job without running it.
pub trait ResourceGuard: Send + Sync {
    fn acquire(&self, job: &Job) -> Result<(), ProcessError>;
    fn release(&self, job: &Job);
}

/// Holds an acquired guard and releases it when dropped, including on unwind.
pub struct GuardScope<'a> {
    guard: &'a dyn ResourceGuard,
    job: &'a Job,
}

impl<'a> GuardScope<'a> {
    pub fn acquire(guard: &'a dyn ResourceGuard, job: &'a Job) -> Result<Self, ProcessError> {
        guard.acquire(job)?;
        Ok(Self { guard, job })
    }
}

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        self.guard.release(self.job);
    }
}
