//! Isolated queue environment for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tempfile::TempDir;

use goesvfi_batch::{
    processor_fn, Job, JobProcessor, JobQueue, ProcessError, ProgressReporter, QueueEvent,
};
use goesvfi_batch::queue::JobQueueBuilder;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let input_dir = base.join("input");
        let output_dir = base.join("output");
        let state_dir = base.join("state");

        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        Self {
            temp_dir,
            input_dir,
            output_dir,
            state_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// State file shared by every queue this harness builds.
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join("batch_queue.json")
    }

    pub fn write_input(&self, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.input_dir.join(filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create input subdir");
        }
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    /// Builder with the harness state file, fast polling and a short stop timeout.
    pub fn queue_builder<P: JobProcessor + 'static>(&self, processor: P) -> JobQueueBuilder {
        JobQueue::builder(processor)
            .persistence_path(self.state_path())
            .poll_interval(Duration::from_millis(5))
            .stop_timeout(Duration::from_secs(5))
    }

    pub fn queue<P: JobProcessor + 'static>(&self, processor: P) -> JobQueue {
        self.queue_builder(processor).build()
    }

    /// Queue whose process function succeeds immediately.
    pub fn instant_queue(&self) -> JobQueue {
        self.queue(processor_fn(|_job: &Job, _progress: &dyn ProgressReporter| Ok(())))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Test side of a blocking process function.
pub struct Gate {
    started: Receiver<String>,
    release: Sender<()>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gate {
    /// Returns a processor that reports each job id on start and then waits
    /// for one release per job.
    pub fn new() -> (impl JobProcessor, Gate) {
        let (started_tx, started_rx) = unbounded::<String>();
        let (release_tx, release_rx) = unbounded::<()>();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let worker_running = Arc::clone(&running);
        let worker_peak = Arc::clone(&peak);
        let processor = processor_fn(move |job: &Job, _progress: &dyn ProgressReporter| {
            let now = worker_running.fetch_add(1, Ordering::SeqCst) + 1;
            worker_peak.fetch_max(now, Ordering::SeqCst);
            let _ = started_tx.send(job.id.clone());

            let released = release_rx.recv_timeout(WAIT);
            worker_running.fetch_sub(1, Ordering::SeqCst);
            released.map_err(|_| ProcessError::msg("gate never released"))
        });

        (
            processor,
            Gate {
                started: started_rx,
                release: release_tx,
                running,
                peak,
            },
        )
    }

    /// Waits for the next job to enter the process function.
    pub fn next_started(&self) -> String {
        self.started
            .recv_timeout(WAIT)
            .expect("no job started in time")
    }

    pub fn try_next_started(&self) -> Option<String> {
        self.started.try_recv().ok()
    }

    pub fn release(&self, count: usize) {
        for _ in 0..count {
            self.release.send(()).expect("gate receiver dropped");
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Records every event the queue emits, in delivery order.
pub fn record_events(queue: &JobQueue) -> Arc<Mutex<Vec<QueueEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    queue.events().on_any(move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    log
}

/// Polls `condition` until it holds or [`WAIT`] passes.
pub fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
