//! Bulk job creation on top of [`JobQueue`].

use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use tracing::info_span;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::job::{Job, JobPriority, JobSettings};
use crate::queue::JobQueue;
use crate::sanitize;
use crate::worker::{DirectoryScanner, JobProcessor};

/// File name pattern used when scanning for satellite frames.
pub const DEFAULT_PATTERN: &str = "*.png";

/// Name prefix given to jobs created by [`BatchProcessor::add_directory`].
pub const DEFAULT_NAME_PREFIX: &str = "Batch";

pub struct BatchProcessor {
    queue: JobQueue,
}

impl BatchProcessor {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    pub fn from_config<P: JobProcessor + 'static>(config: QueueConfig, processor: P) -> Self {
        Self::new(JobQueue::new(config, processor))
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Builds one job per input path without queueing them.
    ///
    /// Output files are `output_dir/{stem}_processed{.ext}`. Ids share a
    /// per-call prefix and end with the zero-based index, so they are unique
    /// within the batch and across batches.
    pub fn create_job_from_paths(
        &self,
        input_paths: &[PathBuf],
        output_dir: &Path,
        settings: &JobSettings,
        name_prefix: &str,
        priority: JobPriority,
    ) -> Vec<Job> {
        let batch_id = format!(
            "batch-{}-{}",
            Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let total = input_paths.len();

        input_paths
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let name = format!(
                    "{} {}/{} - {}",
                    name_prefix,
                    index + 1,
                    total,
                    sanitize::redact_path(input)
                );
                Job::with_id(
                    &format!("{}-{:03}", batch_id, index),
                    &name,
                    input,
                    output_dir.join(processed_file_name(input)),
                )
                .with_settings(settings.clone())
                .with_priority(priority)
            })
            .collect()
    }

    /// Creates and queues one job per input path, returning their ids in order.
    pub fn add_paths(
        &self,
        input_paths: &[PathBuf],
        output_dir: &Path,
        settings: &JobSettings,
        name_prefix: &str,
        priority: JobPriority,
    ) -> Result<Vec<String>> {
        let jobs =
            self.create_job_from_paths(input_paths, output_dir, settings, name_prefix, priority);

        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            let id = job.id.clone();
            self.queue.add_job(job)?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Queues every file in `input_dir` whose name matches `pattern`.
    ///
    /// Files are taken in path order. No match is not an error: a warning is
    /// logged and an empty list returned.
    pub fn add_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        settings: &JobSettings,
        pattern: &str,
        recursive: bool,
        priority: JobPriority,
    ) -> Result<Vec<String>> {
        let _span = info_span!("add_directory",
            dir = %sanitize::hash_path(input_dir),
            pattern,
            recursive,
        )
        .entered();

        let scanner = DirectoryScanner::new(input_dir, pattern, recursive)?;
        let files = scanner.scan()?;

        if files.is_empty() {
            warn!(
                "No files matching '{}' in {}",
                pattern,
                input_dir.display()
            );
            return Ok(Vec::new());
        }

        let ids = self.add_paths(&files, output_dir, settings, DEFAULT_NAME_PREFIX, priority)?;
        info!(
            "Queued {} jobs from {}",
            ids.len(),
            input_dir.display()
        );
        Ok(ids)
    }
}

fn processed_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match input.extension() {
        Some(ext) => format!("{}_processed.{}", stem, ext.to_string_lossy()),
        None => format!("{}_processed", stem),
    }
}
