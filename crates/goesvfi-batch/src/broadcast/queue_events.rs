//! Queue lifecycle events: synchronous observers plus a broadcast channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    JobAdded { job_id: String },
    JobStarted { job_id: String },
    JobProgress { job_id: String, progress: f64 },
    JobCompleted { job_id: String },
    JobFailed { job_id: String, error: String },
    JobCancelled { job_id: String },
    QueueEmpty,
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::JobAdded { .. } => EventKind::JobAdded,
            QueueEvent::JobStarted { .. } => EventKind::JobStarted,
            QueueEvent::JobProgress { .. } => EventKind::JobProgress,
            QueueEvent::JobCompleted { .. } => EventKind::JobCompleted,
            QueueEvent::JobFailed { .. } => EventKind::JobFailed,
            QueueEvent::JobCancelled { .. } => EventKind::JobCancelled,
            QueueEvent::QueueEmpty => EventKind::QueueEmpty,
        }
    }

    /// The job this event is about, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            QueueEvent::JobAdded { job_id }
            | QueueEvent::JobStarted { job_id }
            | QueueEvent::JobProgress { job_id, .. }
            | QueueEvent::JobCompleted { job_id }
            | QueueEvent::JobFailed { job_id, .. }
            | QueueEvent::JobCancelled { job_id } => Some(job_id),
            QueueEvent::QueueEmpty => None,
        }
    }
}

/// Event names observers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JobAdded,
    JobStarted,
    JobProgress,
    JobCompleted,
    JobFailed,
    JobCancelled,
    QueueEmpty,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::JobAdded,
        EventKind::JobStarted,
        EventKind::JobProgress,
        EventKind::JobCompleted,
        EventKind::JobFailed,
        EventKind::JobCancelled,
        EventKind::QueueEmpty,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::JobAdded => "job_added",
            EventKind::JobStarted => "job_started",
            EventKind::JobProgress => "job_progress",
            EventKind::JobCompleted => "job_completed",
            EventKind::JobFailed => "job_failed",
            EventKind::JobCancelled => "job_cancelled",
            EventKind::QueueEmpty => "queue_empty",
        }
    }

    /// Looks up a kind by its snake_case event name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type EventCallback = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

/// Handle returned by [`EventEmitter::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Observer {
    id: SubscriptionId,
    kind: Option<EventKind>,
    callback: EventCallback,
}

/// Delivers queue events to registered callbacks and broadcast subscribers.
///
/// Callbacks run synchronously on the emitting thread. The observer list is
/// not locked while they run, so a callback may register or remove observers
/// and call back into the queue.
pub struct EventEmitter {
    observers: RwLock<Vec<Observer>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<QueueEvent>,
}

impl EventEmitter {
    /// Creates an emitter whose broadcast channel holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Registers a callback for one kind of event.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(callback))
    }

    /// Registers a callback for every event.
    pub fn on_any<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(callback))
    }

    /// Removes a callback. Returns false if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut observers = match self.observers.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != before
    }

    /// Creates a new subscriber for queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        match self.observers.read() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Delivers an event to matching callbacks, then to broadcast subscribers.
    pub fn emit(&self, event: QueueEvent) {
        let kind = event.kind();
        let callbacks: Vec<EventCallback> = {
            let observers = match self.observers.read() {
                Ok(g) => g,
                Err(poisoned) => {
                    log::warn!("Event observer lock was poisoned, recovering");
                    poisoned.into_inner()
                }
            };
            observers
                .iter()
                .filter(|o| o.kind.is_none() || o.kind == Some(kind))
                .map(|o| Arc::clone(&o.callback))
                .collect()
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                log::error!("Observer for {} panicked", kind);
            }
        }

        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    fn register(&self, kind: Option<EventKind>, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut observers = match self.observers.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        observers.push(Observer { id, kind, callback });
        id
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
