//! Event delivery for queue observers.
//!
//! Observers register synchronous callbacks per event kind, or subscribe to a
//! broadcast channel for asynchronous consumption.

pub mod queue_events;

pub use queue_events::{EventCallback, EventEmitter, EventKind, QueueEvent, SubscriptionId};
