//! Runs one claimed job to a terminal state.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;
use tracing::info_span;

use crate::broadcast::QueueEvent;
use crate::job::Job;
use crate::queue::job_queue::{ClaimedJob, QueueShared};
use crate::sanitize;
use crate::worker::guard::{GuardScope, ResourceGuard};
use crate::worker::progress::{ProgressReporter, QueueProgress};

/// Failure reported by (or on behalf of) a process function.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Process function panicked: {0}")]
    Panicked(String),
}

impl ProcessError {
    pub fn msg(message: impl Into<String>) -> Self {
        ProcessError::Failed(message.into())
    }
}

/// The work performed for each job.
pub trait JobProcessor: Send + Sync {
    fn process(&self, job: &Job, progress: &dyn ProgressReporter) -> Result<(), ProcessError>;
}

/// Adapts a closure into a [`JobProcessor`].
pub struct FnProcessor<F>(F);

impl<F> JobProcessor for FnProcessor<F>
where
    F: Fn(&Job, &dyn ProgressReporter) -> Result<(), ProcessError> + Send + Sync,
{
    fn process(&self, job: &Job, progress: &dyn ProgressReporter) -> Result<(), ProcessError> {
        (self.0)(job, progress)
    }
}

/// Wraps a closure as a processor.
pub fn processor_fn<F>(f: F) -> FnProcessor<F>
where
    F: Fn(&Job, &dyn ProgressReporter) -> Result<(), ProcessError> + Send + Sync,
{
    FnProcessor(f)
}

/// Calls the processor inside the optional guard scope. Panics are turned
/// into [`ProcessError::Panicked`]; the guard is released on every path.
pub fn execute(
    processor: &dyn JobProcessor,
    guard: Option<&dyn ResourceGuard>,
    job: &Job,
    progress: &dyn ProgressReporter,
) -> Result<(), ProcessError> {
    let _scope = match guard {
        Some(guard) => Some(GuardScope::acquire(guard, job)?),
        None => None,
    };

    match catch_unwind(AssertUnwindSafe(|| processor.process(job, progress))) {
        Ok(result) => result,
        Err(payload) => Err(ProcessError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Body of a job thread: announce, run, record the outcome.
pub(crate) fn run_job(shared: Arc<QueueShared>, claimed: ClaimedJob) {
    let ClaimedJob {
        job,
        generation,
        snapshot,
    } = claimed;

    let _span = info_span!("execute_job",
        job_id = %job.id,
        input = %sanitize::redact_path(&job.input_path),
        priority = %job.priority,
    )
    .entered();

    shared.persist(generation, &snapshot);
    drop(snapshot);

    info!("Started job {} ({})", job.id, job.name);
    shared.events().emit(QueueEvent::JobStarted {
        job_id: job.id.clone(),
    });

    let progress = QueueProgress::new(Arc::clone(&shared), &job.id);
    let outcome = execute(
        shared.processor(),
        shared.resource_guard(),
        &job,
        &progress,
    );

    match &outcome {
        Ok(()) => info!("Job {} completed", job.id),
        Err(e) => warn!("Job {} failed: {}", job.id, e),
    }

    shared.finish(&job.id, outcome.map_err(|e| e.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::progress::NoopProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ReleaseCounter {
        released: AtomicUsize,
    }

    impl ResourceGuard for ReleaseCounter {
        fn acquire(&self, _job: &Job) -> Result<(), ProcessError> {
            Ok(())
        }

        fn release(&self, _job: &Job) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job() -> Job {
        Job::new("clip", "/in/clip.mp4", "/out/clip_processed.mp4")
    }

    #[test]
    fn test_execute_success() {
        let processor = processor_fn(|_job, progress| {
            progress.report(50.0);
            Ok(())
        });
        assert!(execute(&processor, None, &job(), &NoopProgress).is_ok());
    }

    #[test]
    fn test_execute_failure_keeps_message() {
        let processor = processor_fn(|_job, _progress| Err(ProcessError::msg("boom")));
        let err = execute(&processor, None, &job(), &NoopProgress).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_execute_catches_panic_and_releases_guard() {
        let guard = ReleaseCounter {
            released: AtomicUsize::new(0),
        };
        let processor = processor_fn(|_job, _progress| panic!("decoder crashed"));

        let err = execute(&processor, Some(&guard), &job(), &NoopProgress).unwrap_err();

        assert!(matches!(err, ProcessError::Panicked(_)));
        assert!(err.to_string().contains("decoder crashed"));
        assert_eq!(guard.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_execute_releases_guard_on_error() {
        let guard = ReleaseCounter {
            released: AtomicUsize::new(0),
        };
        let processor = processor_fn(|_job, _progress| {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into())
        });

        let err = execute(&processor, Some(&guard), &job(), &NoopProgress).unwrap_err();
        assert!(matches!(err, ProcessError::Io(_)));
        assert_eq!(guard.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_processor_sees_job_fields() {
        let processor = processor_fn(|job, _progress| {
            if job.output_path.ends_with("clip_processed.mp4") {
                Ok(())
            } else {
                Err(ProcessError::msg("wrong output"))
            }
        });
        assert!(execute(&processor, None, &job(), &NoopProgress).is_ok());
    }
}
