//! Background loop that keeps up to `max_concurrent_jobs` executions running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info};

use crate::queue::job_queue::{Claim, ClaimedJob, QueueShared};
use crate::worker::executor;

/// Runs until `running` is cleared. Each dispatcher owns its own flag.
pub(crate) fn run_dispatcher(shared: Arc<QueueShared>, running: Arc<AtomicBool>) {
    info!(
        "Dispatcher started (max {} concurrent jobs)",
        shared.max_concurrent_jobs()
    );

    let poll_interval = shared.poll_interval();

    while running.load(Ordering::Acquire) {
        match shared.claim_next() {
            Claim::Job(claimed) => spawn_executor(&shared, claimed),
            Claim::AtCapacity => shared.wait_for_completion(poll_interval),
            Claim::Idle => thread::sleep(poll_interval),
        }
    }

    info!("Dispatcher stopped");
}

fn spawn_executor(shared: &Arc<QueueShared>, claimed: ClaimedJob) {
    let job_id = claimed.job.id.clone();
    let worker_shared = Arc::clone(shared);

    debug!("Dispatching job {}", job_id);

    let spawned = thread::Builder::new()
        .name(format!("goesvfi-job-{}", short_id(&job_id)))
        .spawn(move || executor::run_job(worker_shared, claimed));

    if let Err(e) = spawned {
        error!("Failed to spawn thread for job {}: {}", job_id, e);
        shared.finish(&job_id, Err(format!("Failed to start job thread: {}", e)));
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
