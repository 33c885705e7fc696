//! The job table, its priority-ordered ready-set, and the queue API.
//!
//! All in-memory state sits behind one mutex. The lock is held only for the
//! mutation itself; persistence and event delivery happen after it is
//! released, so observers may call back into the queue.

use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::broadcast::{EventEmitter, EventKind, QueueEvent, SubscriptionId};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::job::{Job, JobStatus};
use crate::queue::ordering::{compare_jobs, ReadyEntry};
use crate::queue::store::QueueStore;
use crate::worker::dispatcher;
use crate::worker::executor::JobProcessor;
use crate::worker::guard::ResourceGuard;

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Result of one dispatch attempt.
pub(crate) enum Claim {
    Job(ClaimedJob),
    AtCapacity,
    Idle,
}

/// A job taken off the ready-set and marked RUNNING, together with the
/// table snapshot that records the transition.
pub(crate) struct ClaimedJob {
    pub job: Job,
    pub generation: u64,
    pub snapshot: Vec<Job>,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    ready: BinaryHeap<ReadyEntry>,
    /// Arrival sequence per job id; the FIFO tie-break and file order.
    arrival: HashMap<String, u64>,
    next_sequence: u64,
    /// Bumped for every snapshot handed to the store.
    generation: u64,
    in_flight: usize,
}

impl QueueState {
    fn restore(saved: Vec<Job>) -> Self {
        let mut state = Self::default();
        let mut recovered = 0usize;

        for mut job in saved {
            if state.jobs.contains_key(&job.id) {
                warn!(
                    "Saved queue contains job {} more than once, keeping the first",
                    job.id
                );
                continue;
            }
            if job.reset_interrupted() {
                recovered += 1;
            }
            let sequence = state.next_sequence();
            state.arrival.insert(job.id.clone(), sequence);
            if job.is_pending() {
                state.ready.push(ReadyEntry::new(&job, sequence));
            }
            state.jobs.insert(job.id.clone(), job);
        }

        if recovered > 0 {
            info!("Requeued {} jobs interrupted by a previous shutdown", recovered);
        }
        state
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn sequence_of(&self, job_id: &str) -> u64 {
        self.arrival.get(job_id).copied().unwrap_or(u64::MAX)
    }

    fn ordered_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|j| self.sequence_of(&j.id));
        jobs.into_iter().cloned().collect()
    }

    fn snapshot(&mut self) -> (u64, Vec<Job>) {
        self.generation += 1;
        (self.generation, self.ordered_jobs())
    }

    fn has_pending(&self) -> bool {
        self.jobs.values().any(Job::is_pending)
    }
}

/// A running dispatcher thread and the flag that keeps it looping.
struct DispatcherHandle {
    thread: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

pub(crate) struct QueueShared {
    state: Mutex<QueueState>,
    store: QueueStore,
    events: EventEmitter,
    processor: Arc<dyn JobProcessor>,
    resource_guard: Option<Arc<dyn ResourceGuard>>,
    max_concurrent: AtomicUsize,
    active: AtomicBool,
    poll_interval: Duration,
    stop_timeout: Duration,
    /// Guards start/stop transitions; `active` only changes while it is held.
    dispatcher: Mutex<Option<DispatcherHandle>>,
    /// Holds at most one wake-up token.
    completion_tx: Sender<()>,
    completion_rx: Receiver<()>,
}

impl QueueShared {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Job queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn processor(&self) -> &dyn JobProcessor {
        self.processor.as_ref()
    }

    pub fn resource_guard(&self) -> Option<&dyn ResourceGuard> {
        self.resource_guard.as_deref()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.lock_state().in_flight
    }

    fn is_idle(&self) -> bool {
        let state = self.lock_state();
        state.in_flight == 0 && !state.has_pending()
    }

    /// Best-effort write. Failures are logged and memory stays authoritative.
    pub fn persist(&self, generation: u64, jobs: &[Job]) {
        if let Err(e) = self.store.save_snapshot(generation, jobs) {
            error!(
                "Failed to persist job queue to {}: {}",
                self.store.path().display(),
                e
            );
        }
    }

    /// Pops the best pending job and marks it RUNNING, if a slot is free.
    ///
    /// Stale ready-set entries (cancelled, cleared or superseded jobs) are
    /// discarded without consuming a slot.
    pub fn claim_next(&self) -> Claim {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        if state.in_flight >= self.max_concurrent_jobs() {
            return Claim::AtCapacity;
        }

        while let Some(entry) = state.ready.pop() {
            if state.arrival.get(&entry.job_id) != Some(&entry.sequence) {
                continue;
            }
            let job = match state.jobs.get_mut(&entry.job_id) {
                Some(job) => job,
                None => continue,
            };
            if job.status != JobStatus::Pending {
                debug!("Discarding {} job {} from ready-set", job.status, job.id);
                continue;
            }

            job.mark_running();
            let claimed = job.clone();
            state.in_flight += 1;
            let (generation, snapshot) = state.snapshot();
            return Claim::Job(ClaimedJob {
                job: claimed,
                generation,
                snapshot,
            });
        }

        Claim::Idle
    }

    pub fn record_progress(&self, job_id: &str, percent: f64) {
        if !percent.is_finite() {
            debug!("Ignoring non-finite progress for job {}", job_id);
            return;
        }
        let percent = percent.clamp(0.0, 100.0);

        let updated = {
            let mut state = self.lock_state();
            match state.jobs.get_mut(job_id) {
                Some(job) if job.status == JobStatus::Running && percent >= job.progress => {
                    job.progress = percent;
                    true
                }
                _ => false,
            }
        };

        if updated {
            self.events.emit(QueueEvent::JobProgress {
                job_id: job_id.to_string(),
                progress: percent,
            });
        }
    }

    /// Records the terminal state of a claimed job and frees its slot.
    pub fn finish(&self, job_id: &str, outcome: Result<(), String>) {
        let (event, snapshot, idle) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            state.in_flight = state.in_flight.saturating_sub(1);

            let event = match state.jobs.get_mut(job_id) {
                Some(job) if job.status == JobStatus::Running => match outcome {
                    Ok(()) => {
                        job.mark_completed();
                        Some(QueueEvent::JobCompleted {
                            job_id: job_id.to_string(),
                        })
                    }
                    Err(message) => {
                        job.mark_failed(message.clone());
                        Some(QueueEvent::JobFailed {
                            job_id: job_id.to_string(),
                            error: message,
                        })
                    }
                },
                Some(job) => {
                    warn!(
                        "Job {} finished while {}, leaving its state alone",
                        job_id, job.status
                    );
                    None
                }
                None => {
                    warn!("Finished job {} is no longer in the queue", job_id);
                    None
                }
            };

            let snapshot = event.as_ref().map(|_| state.snapshot());
            let idle = state.in_flight == 0 && !state.has_pending();
            (event, snapshot, idle)
        };

        if let Some((generation, jobs)) = snapshot {
            self.persist(generation, &jobs);
        }
        if let Some(event) = event {
            self.events.emit(event);
        }
        if idle {
            info!("Job queue is empty");
            self.events.emit(QueueEvent::QueueEmpty);
        }

        // A full channel already holds a wake-up.
        let _ = self.completion_tx.try_send(());
    }

    /// Blocks until some job finishes or `timeout` elapses.
    pub fn wait_for_completion(&self, timeout: Duration) {
        let _ = self.completion_rx.recv_timeout(timeout);
    }
}

/// Priority job queue with a bounded dispatcher.
///
/// Cloning is cheap and every clone drives the same queue.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<QueueShared>,
}

impl JobQueue {
    pub fn builder<P: JobProcessor + 'static>(processor: P) -> JobQueueBuilder {
        JobQueueBuilder::new(Arc::new(processor))
    }

    /// Builds a queue from configuration, restoring any saved state.
    pub fn new<P: JobProcessor + 'static>(config: QueueConfig, processor: P) -> Self {
        Self::builder(processor).config(config).build()
    }

    /// Adds a job to the table and, if it is pending, to the ready-set.
    ///
    /// Ids must be unique: a second job with a known id is rejected with
    /// [`QueueError::DuplicateJob`] and the queue is left unchanged.
    ///
    /// Paths must be valid UTF-8 so the job can be written to the state
    /// file. A job handed in as RUNNING is reset to PENDING, since only the
    /// dispatcher may mark a job running.
    pub fn add_job(&self, mut job: Job) -> Result<(), QueueError> {
        let job_id = job.id.clone();
        for path in [&job.input_path, &job.output_path] {
            if path.to_str().is_none() {
                warn!("Rejecting job {} with non UTF-8 path", job_id);
                return Err(QueueError::InvalidPath {
                    job_id,
                    path: path.clone(),
                });
            }
        }
        if job.reset_interrupted() {
            warn!("Job {} was added as RUNNING, queueing it as PENDING", job_id);
        }
        let (sequence, generation, snapshot) = {
            let mut state = self.shared.lock_state();
            if state.jobs.contains_key(&job_id) {
                warn!("Rejecting duplicate job id {}", job_id);
                return Err(QueueError::DuplicateJob(job_id));
            }
            let sequence = state.next_sequence();
            state.arrival.insert(job_id.clone(), sequence);
            state.jobs.insert(job_id.clone(), job);
            let (generation, snapshot) = state.snapshot();
            (sequence, generation, snapshot)
        };

        self.shared.persist(generation, &snapshot);
        info!("Added job {}", job_id);
        self.shared.events.emit(QueueEvent::JobAdded {
            job_id: job_id.clone(),
        });

        // Published only now so `job_started` can never overtake `job_added`.
        let mut guard = self.shared.lock_state();
        let state = &mut *guard;
        if let Some(job) = state.jobs.get(&job_id) {
            if job.is_pending() && state.arrival.get(&job_id) == Some(&sequence) {
                state.ready.push(ReadyEntry::new(job, sequence));
            }
        }
        Ok(())
    }

    /// Cancels a PENDING job. Returns false for unknown ids and for jobs
    /// that are already running or finished.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let snapshot = {
            let mut state = self.shared.lock_state();
            match state.jobs.get_mut(job_id) {
                Some(job) if job.status == JobStatus::Pending => {
                    job.status = JobStatus::Cancelled;
                }
                Some(job) => {
                    debug!("Cannot cancel job {} while {}", job_id, job.status);
                    return false;
                }
                None => {
                    debug!("Cannot cancel unknown job {}", job_id);
                    return false;
                }
            }
            state.snapshot()
        };

        self.shared.persist(snapshot.0, &snapshot.1);
        info!("Cancelled job {}", job_id);
        self.shared.events.emit(QueueEvent::JobCancelled {
            job_id: job_id.to_string(),
        });
        true
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.shared.lock_state().jobs.get(job_id).cloned()
    }

    /// Every job in the table, in arrival order.
    pub fn get_all_jobs(&self) -> Vec<Job> {
        self.shared.lock_state().ordered_jobs()
    }

    /// Pending jobs in dispatch order: priority, then creation time, then arrival.
    pub fn get_pending_jobs(&self) -> Vec<Job> {
        let state = self.shared.lock_state();
        let mut pending: Vec<(u64, &Job)> = state
            .jobs
            .values()
            .filter(|j| j.is_pending())
            .map(|j| (state.sequence_of(&j.id), j))
            .collect();
        pending.sort_by(|(seq_a, a), (seq_b, b)| compare_jobs(a, b).then(seq_a.cmp(seq_b)));
        pending.into_iter().map(|(_, j)| j.clone()).collect()
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<Job> {
        self.get_all_jobs()
            .into_iter()
            .filter(|j| j.status == status)
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.lock_state();
        let mut stats = QueueStats {
            total: state.jobs.len(),
            ..QueueStats::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Removes COMPLETED and CANCELLED jobs. FAILED jobs stay visible.
    pub fn clear_completed(&self) -> usize {
        let (removed, snapshot) = {
            let mut guard = self.shared.lock_state();
            let state = &mut *guard;
            let before = state.jobs.len();
            state.jobs.retain(|_, job| !job.status.is_clearable());
            let removed = before - state.jobs.len();
            if removed == 0 {
                return 0;
            }

            let jobs = &state.jobs;
            state.arrival.retain(|id, _| jobs.contains_key(id));
            state
                .ready
                .retain(|entry| jobs.get(&entry.job_id).is_some_and(Job::is_pending));
            (removed, state.snapshot())
        };

        self.shared.persist(snapshot.0, &snapshot.1);
        info!("Cleared {} finished jobs", removed);
        removed
    }

    /// Starts the dispatcher. Calling it on a running queue does nothing.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut slot = self.lock_dispatcher();
        if slot.is_some() {
            debug!("Job queue already running");
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("goesvfi-dispatcher".to_string())
            .spawn(move || dispatcher::run_dispatcher(shared, flag))
            .map_err(|e| QueueError::SpawnFailed(e.to_string()))?;

        *slot = Some(DispatcherHandle { thread, running });
        self.shared.active.store(true, Ordering::Release);
        info!("Job queue started");
        Ok(())
    }

    /// Stops dispatching and waits, up to the stop timeout, for running jobs.
    ///
    /// Jobs still running when the timeout expires are left to finish on
    /// their own threads; their terminal events are still delivered.
    pub fn stop(&self) {
        let handle = {
            let mut slot = self.lock_dispatcher();
            match slot.take() {
                Some(handle) => {
                    handle.running.store(false, Ordering::Release);
                    self.shared.active.store(false, Ordering::Release);
                    handle
                }
                None => {
                    debug!("Job queue already stopped");
                    return;
                }
            }
        };
        info!("Stopping job queue...");

        if handle.thread.thread().id() == thread::current().id() {
            warn!("stop() called on the dispatcher thread, not joining it");
        } else if let Err(e) = handle.thread.join() {
            error!("Dispatcher thread panicked: {:?}", e);
        }

        let timeout = self.shared.stop_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let running = self.shared.in_flight();
            if running == 0 {
                info!("Job queue stopped");
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Stop timed out after {:?} with {} job(s) still running",
                    timeout, running
                );
                return;
            }
            self.shared
                .wait_for_completion((deadline - now).min(self.shared.poll_interval));
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Waits until nothing is pending or running. Returns false on timeout.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.shared
                .wait_for_completion((deadline - now).min(self.shared.poll_interval));
        }
    }

    /// Changes the concurrency cap. Running jobs are never preempted; the
    /// new value applies from the next dispatch decision.
    pub fn set_max_concurrent_jobs(&self, max: usize) {
        let max = max.max(1);
        self.shared.max_concurrent.store(max, Ordering::Release);
        info!("Max concurrent jobs set to {}", max);
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.shared.max_concurrent_jobs()
    }

    /// Number of jobs currently claimed for execution.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    pub fn persistence_path(&self) -> &Path {
        self.shared.store.path()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.shared.events
    }

    /// Shorthand for `events().on(kind, callback)`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(kind, callback)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    fn lock_dispatcher(&self) -> MutexGuard<'_, Option<DispatcherHandle>> {
        match self.shared.dispatcher.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct JobQueueBuilder {
    processor: Arc<dyn JobProcessor>,
    config: QueueConfig,
    persistence_path: Option<PathBuf>,
    poll_interval: Option<Duration>,
    stop_timeout: Option<Duration>,
    resource_guard: Option<Arc<dyn ResourceGuard>>,
}

impl JobQueueBuilder {
    fn new(processor: Arc<dyn JobProcessor>) -> Self {
        Self {
            processor,
            config: QueueConfig::default(),
            persistence_path: None,
            poll_interval: None,
            stop_timeout: None,
            resource_guard: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.max_concurrent_jobs = max;
        self
    }

    /// State file for this queue. Takes precedence over the environment
    /// override and the configured path.
    pub fn persistence_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.persistence_path = Some(path.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    pub fn resource_guard<G: ResourceGuard + 'static>(mut self, guard: G) -> Self {
        self.resource_guard = Some(Arc::new(guard));
        self
    }

    pub fn build(self) -> JobQueue {
        let path = self
            .persistence_path
            .unwrap_or_else(|| self.config.resolve_persistence_path());
        let store = QueueStore::new(&path);

        let saved = match store.load() {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("{}; starting with an empty queue", e);
                Vec::new()
            }
        };
        let state = QueueState::restore(saved);
        info!(
            "Job queue ready with {} jobs ({} pending) from {}",
            state.jobs.len(),
            state.ready.len(),
            path.display()
        );

        let poll_interval = self
            .poll_interval
            .unwrap_or_else(|| self.config.poll_interval())
            .max(Duration::from_millis(1));
        let stop_timeout = self
            .stop_timeout
            .unwrap_or_else(|| self.config.stop_timeout());
        let (completion_tx, completion_rx) = bounded(1);

        JobQueue {
            shared: Arc::new(QueueShared {
                state: Mutex::new(state),
                store,
                events: EventEmitter::new(self.config.event_channel_capacity),
                processor: self.processor,
                resource_guard: self.resource_guard,
                max_concurrent: AtomicUsize::new(self.config.max_concurrent_jobs.max(1)),
                active: AtomicBool::new(false),
                poll_interval,
                stop_timeout,
                dispatcher: Mutex::new(None),
                completion_tx,
                completion_rx,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPriority;
    use crate::worker::executor::{processor_fn, ProcessError};
    use tempfile::TempDir;

    fn idle_queue(temp_dir: &TempDir) -> JobQueue {
        JobQueue::builder(processor_fn(|_job, _progress| Ok(())))
            .persistence_path(temp_dir.path().join("queue.json"))
            .poll_interval(Duration::from_millis(5))
            .build()
    }

    fn job(id: &str, priority: JobPriority) -> Job {
        Job::with_id(id, id, format!("/in/{id}.png"), format!("/out/{id}.png"))
            .with_priority(priority)
    }

    #[test]
    fn test_pending_jobs_follow_priority() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);

        queue.add_job(job("low", JobPriority::Low)).unwrap();
        queue.add_job(job("urgent", JobPriority::Urgent)).unwrap();
        queue.add_job(job("normal", JobPriority::Normal)).unwrap();

        let ids: Vec<String> = queue.get_pending_jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["urgent", "normal", "low"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);

        queue.add_job(job("a", JobPriority::Normal)).unwrap();
        let result = queue.add_job(job("a", JobPriority::Urgent));

        assert!(matches!(result, Err(QueueError::DuplicateJob(id)) if id == "a"));
        assert_eq!(queue.get_all_jobs().len(), 1);
        assert_eq!(queue.get_job("a").unwrap().priority, JobPriority::Normal);
    }

    #[test]
    fn test_cancel_pending_job_once() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        queue.add_job(job("a", JobPriority::Normal)).unwrap();

        assert!(queue.cancel_job("a"));
        assert_eq!(queue.get_job("a").unwrap().status, JobStatus::Cancelled);
        assert!(!queue.cancel_job("a"));
        assert!(!queue.cancel_job("missing"));
        assert!(queue.get_pending_jobs().is_empty());
    }

    #[test]
    fn test_claim_skips_cancelled_jobs() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        queue.add_job(job("first", JobPriority::Urgent)).unwrap();
        queue.add_job(job("second", JobPriority::Low)).unwrap();
        queue.cancel_job("first");

        match queue.shared.claim_next() {
            Claim::Job(claimed) => {
                assert_eq!(claimed.job.id, "second");
                assert_eq!(claimed.job.status, JobStatus::Running);
                assert!(claimed.job.started_at.is_some());
            }
            _ => panic!("expected a claim"),
        }
        assert_eq!(queue.in_flight(), 1);
        assert!(matches!(queue.shared.claim_next(), Claim::AtCapacity));
    }

    #[test]
    fn test_claimed_job_cannot_be_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        queue.add_job(job("a", JobPriority::Normal)).unwrap();

        assert!(matches!(queue.shared.claim_next(), Claim::Job(_)));
        assert!(!queue.cancel_job("a"));
        assert_eq!(queue.get_job("a").unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_finish_is_final() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        queue.add_job(job("a", JobPriority::Normal)).unwrap();
        assert!(matches!(queue.shared.claim_next(), Claim::Job(_)));

        queue.shared.finish("a", Err("boom".to_string()));
        queue.shared.finish("a", Ok(()));
        queue.shared.record_progress("a", 80.0);

        let job = queue.get_job("a").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert_eq!(job.progress, 0.0);
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        queue.add_job(job("a", JobPriority::Normal)).unwrap();
        assert!(matches!(queue.shared.claim_next(), Claim::Job(_)));

        queue.shared.record_progress("a", 40.0);
        queue.shared.record_progress("a", 20.0);
        assert_eq!(queue.get_job("a").unwrap().progress, 40.0);

        queue.shared.record_progress("a", 250.0);
        assert_eq!(queue.get_job("a").unwrap().progress, 100.0);

        queue.shared.record_progress("a", f64::NAN);
        assert_eq!(queue.get_job("a").unwrap().progress, 100.0);
    }

    #[test]
    fn test_clear_completed_scope() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        for id in ["done", "failed", "cancelled", "pending"] {
            queue.add_job(job(id, JobPriority::Normal)).unwrap();
        }
        queue.cancel_job("cancelled");

        // Claim order is arrival order within one priority.
        assert!(matches!(queue.shared.claim_next(), Claim::Job(c) if c.job.id == "done"));
        queue.shared.finish("done", Ok(()));
        assert!(matches!(queue.shared.claim_next(), Claim::Job(c) if c.job.id == "failed"));
        queue.shared.finish("failed", Err("bad frame".to_string()));

        assert_eq!(queue.clear_completed(), 2);
        assert_eq!(queue.clear_completed(), 0);

        let mut remaining: Vec<String> = queue.get_all_jobs().into_iter().map(|j| j.id).collect();
        remaining.sort();
        assert_eq!(remaining, vec!["failed", "pending"]);
    }

    #[test]
    fn test_readded_id_after_clear_is_dispatched_once() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        queue.add_job(job("a", JobPriority::Normal)).unwrap();
        queue.cancel_job("a");
        queue.clear_completed();

        queue.add_job(job("a", JobPriority::Normal)).unwrap();
        assert!(matches!(queue.shared.claim_next(), Claim::Job(c) if c.job.id == "a"));
        queue.set_max_concurrent_jobs(5);
        assert!(matches!(queue.shared.claim_next(), Claim::Idle));
    }

    #[test]
    fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        queue.add_job(job("a", JobPriority::Normal)).unwrap();
        queue.add_job(job("b", JobPriority::Normal)).unwrap();
        queue.add_job(job("c", JobPriority::Normal)).unwrap();
        queue.cancel_job("c");
        assert!(matches!(queue.shared.claim_next(), Claim::Job(_)));

        let stats = queue.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(queue.jobs_with_status(JobStatus::Cancelled).len(), 1);
    }

    #[test]
    fn test_set_max_concurrent_jobs_clamps_to_one() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        queue.set_max_concurrent_jobs(0);
        assert_eq!(queue.max_concurrent_jobs(), 1);
        queue.set_max_concurrent_jobs(4);
        assert_eq!(queue.max_concurrent_jobs(), 4);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);

        queue.stop();
        queue.start().unwrap();
        queue.start().unwrap();
        assert!(queue.is_running());
        queue.stop();
        queue.stop();
        assert!(!queue.is_running());
    }

    #[test]
    fn test_corrupt_state_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");
        std::fs::write(&path, "[[[").unwrap();

        let queue = JobQueue::builder(processor_fn(|_job, _progress| {
            Err(ProcessError::msg("unused"))
        }))
        .persistence_path(&path)
        .build();

        assert!(queue.get_all_jobs().is_empty());
        queue.add_job(job("a", JobPriority::Normal)).unwrap();
        assert_eq!(QueueStore::new(&path).load().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        let bad_input = Path::new(OsStr::from_bytes(b"/in/fr\xffame.png"));

        let result = queue.add_job(Job::with_id("bad", "bad", bad_input, "/out/frame.png"));
        assert!(matches!(
            result,
            Err(QueueError::InvalidPath { ref job_id, ref path })
                if job_id == "bad" && path.as_path() == bad_input
        ));
        assert!(queue.get_job("bad").is_none());

        // Later saves still reach the file.
        queue.add_job(job("good", JobPriority::Normal)).unwrap();
        let saved = QueueStore::new(queue.persistence_path()).load().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, "good");
    }

    #[test]
    fn test_running_job_is_added_as_pending() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        let mut stale = job("stale", JobPriority::Normal);
        stale.status = JobStatus::Running;
        stale.started_at = Some(chrono::Utc::now());
        stale.progress = 30.0;

        queue.add_job(stale).unwrap();

        let added = queue.get_job("stale").unwrap();
        assert_eq!(added.status, JobStatus::Pending);
        assert_eq!(added.progress, 0.0);
        assert!(added.started_at.is_none());
        assert_eq!(queue.in_flight(), 0);
        assert!(matches!(queue.shared.claim_next(), Claim::Job(c) if c.job.id == "stale"));
    }

    #[test]
    fn test_completion_signals_do_not_pile_up() {
        let temp_dir = TempDir::new().unwrap();
        let queue = idle_queue(&temp_dir);
        queue.set_max_concurrent_jobs(4);

        for i in 0..20 {
            let id = format!("job-{}", i);
            queue.add_job(job(&id, JobPriority::Normal)).unwrap();
            assert!(matches!(queue.shared.claim_next(), Claim::Job(_)));
            queue.shared.finish(&id, Ok(()));
        }

        assert_eq!(queue.shared.completion_tx.len(), 1);
        assert_eq!(queue.stats().completed, 20);
    }
}
