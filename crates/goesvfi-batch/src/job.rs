use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form settings handed to the process function unchanged.
pub type JobSettings = serde_json::Map<String, serde_json::Value>;

/// Scheduling priority. Lower discriminant runs first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobPriority {
    Urgent = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::Urgent => write!(f, "URGENT"),
            JobPriority::High => write!(f, "HIGH"),
            JobPriority::Normal => write!(f, "NORMAL"),
            JobPriority::Low => write!(f, "LOW"),
        }
    }
}

/// Lifecycle state of a job.
///
/// `Pending -> Running -> Completed | Failed`, or `Pending -> Cancelled`.
/// The three terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Statuses swept by `JobQueue::clear_completed`. Failed jobs stay visible.
    pub fn is_clearable(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub settings: JobSettings,
    #[serde(default)]
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub progress: f64,
}

impl Job {
    /// Creates a pending job with a generated id.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(name: &str, input_path: P, output_path: Q) -> Self {
        Self::with_id(
            &uuid::Uuid::new_v4().to_string(),
            name,
            input_path,
            output_path,
        )
    }

    /// Creates a pending job with a caller-chosen id.
    pub fn with_id<P: AsRef<Path>, Q: AsRef<Path>>(
        id: &str,
        name: &str,
        input_path: P,
        output_path: Q,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            input_path: input_path.as_ref().to_path_buf(),
            output_path: output_path.as_ref().to_path_buf(),
            settings: JobSettings::new(),
            priority: JobPriority::Normal,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            progress: 0.0,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Puts a job that was RUNNING when its state was last saved back to
    /// PENDING, as if it had never started. Returns true if anything changed.
    pub(crate) fn reset_interrupted(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.progress = 0.0;
        true
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.progress = 0.0;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.completed_at = Some(Utc::now());
        self.error_message = None;
    }

    pub(crate) fn mark_failed(&mut self, message: String) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message);
    }
}
