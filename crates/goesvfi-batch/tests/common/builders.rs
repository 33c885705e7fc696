//! Builders for jobs in any lifecycle state.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use goesvfi_batch::{Job, JobPriority, JobSettings, JobStatus};

pub struct JobBuilder {
    id: String,
    name: String,
    input: String,
    output: String,
    priority: JobPriority,
    status: JobStatus,
    settings: JobSettings,
    created_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    progress: f64,
    error_message: Option<String>,
}

impl JobBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Job {}", id),
            input: format!("/data/in/{}.png", id),
            output: format!("/data/out/{}_processed.png", id),
            priority: JobPriority::Normal,
            status: JobStatus::Pending,
            settings: JobSettings::new(),
            created_at: None,
            started_at: None,
            progress: 0.0,
            error_message: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn input(mut self, path: &str) -> Self {
        self.input = path.to_string();
        self
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn setting(mut self, key: &str, value: Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    /// Offsets `created_at` from now, e.g. `-60` for a minute ago.
    pub fn created_secs_from_now(mut self, secs: i64) -> Self {
        self.created_at = Some(Utc::now() + Duration::seconds(secs));
        self
    }

    /// A job that was mid-run when the previous process died.
    pub fn interrupted(mut self, progress: f64) -> Self {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.progress = progress;
        self
    }

    pub fn completed(mut self) -> Self {
        self.status = JobStatus::Completed;
        self.started_at = Some(Utc::now());
        self.progress = 100.0;
        self
    }

    pub fn failed(mut self, message: &str) -> Self {
        self.status = JobStatus::Failed;
        self.started_at = Some(Utc::now());
        self.error_message = Some(message.to_string());
        self
    }

    pub fn build(self) -> Job {
        let mut job = Job::with_id(&self.id, &self.name, &self.input, &self.output)
            .with_priority(self.priority)
            .with_settings(self.settings);
        if let Some(created_at) = self.created_at {
            job.created_at = created_at;
        }
        job.status = self.status;
        job.started_at = self.started_at;
        job.progress = self.progress;
        job.error_message = self.error_message;
        if self.status.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        job
    }
}
