//! JSON file holding the full job table.
//!
//! Layout: `{"jobs": [ <job>, ... ]}` with jobs in arrival order. The file is
//! rewritten whole on every save.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::job::Job;

/// On-disk representation of the queue.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedQueue {
    #[serde(default)]
    pub jobs: Vec<Job>,
}

pub struct QueueStore {
    path: PathBuf,
    /// Generation of the newest snapshot written so far. Also serializes writers.
    last_written: Mutex<u64>,
}

impl QueueStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            last_written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every persisted job. A missing file is an empty queue.
    pub fn load(&self) -> Result<Vec<Job>, PersistenceError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No queue state at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(PersistenceError::ReadFile {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let persisted: PersistedQueue =
            serde_json::from_str(&content).map_err(|e| PersistenceError::Parse {
                path: self.path.clone(),
                source: e,
            })?;

        Ok(persisted.jobs)
    }

    /// Writes the given jobs unconditionally.
    pub fn save(&self, jobs: &[Job]) -> Result<(), PersistenceError> {
        let _guard = self.lock_written();
        self.write(jobs)
    }

    /// Writes a snapshot taken at `generation`, unless a newer snapshot has
    /// already been written. Returns whether the file was touched.
    pub(crate) fn save_snapshot(
        &self,
        generation: u64,
        jobs: &[Job],
    ) -> Result<bool, PersistenceError> {
        let mut guard = self.lock_written();
        if generation <= *guard {
            log::trace!(
                "Skipping stale queue snapshot {} (already wrote {})",
                generation,
                *guard
            );
            return Ok(false);
        }
        self.write(jobs)?;
        *guard = generation;
        Ok(true)
    }

    fn lock_written(&self) -> std::sync::MutexGuard<'_, u64> {
        match self.last_written.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Queue store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self, jobs: &[Job]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        #[derive(Serialize)]
        struct PersistedQueueRef<'a> {
            jobs: &'a [Job],
        }

        let json = serde_json::to_string_pretty(&PersistedQueueRef { jobs })?;

        // Write next to the target and rename over it so readers never see a
        // half-written file.
        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, json).map_err(|e| PersistenceError::WriteFile {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| PersistenceError::WriteFile {
            path: self.path.clone(),
            source: e,
        })?;

        log::trace!("Saved {} jobs to {}", jobs.len(), self.path.display());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "batch_queue.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
