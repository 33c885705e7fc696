//! Dispatch order for pending jobs: priority first, then arrival.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::job::{Job, JobPriority};

/// Entry in the ready-set heap.
///
/// `sequence` is the arrival counter assigned when the job entered the queue.
/// It breaks ties between jobs created within the same clock tick so the
/// order is total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReadyEntry {
    pub priority: JobPriority,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
    pub job_id: String,
}

impl ReadyEntry {
    pub fn new(job: &Job, sequence: u64) -> Self {
        Self {
            priority: job.priority,
            created_at: job.created_at,
            sequence,
            job_id: job.id.clone(),
        }
    }

    fn key(&self) -> (JobPriority, DateTime<Utc>, u64) {
        (self.priority, self.created_at, self.sequence)
    }
}

// `BinaryHeap` is a max-heap, so the comparison is reversed to pop the
// highest-priority, earliest job first.
impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ascending dispatch order: `Less` means `a` runs before `b`.
pub fn compare_jobs(a: &Job, b: &Job) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}
