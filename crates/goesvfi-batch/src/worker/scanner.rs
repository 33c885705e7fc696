use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, info};
use walkdir::WalkDir;

use crate::error::WorkerError;

/// Finds input files whose name matches a glob pattern.
pub struct DirectoryScanner {
    input_directory: PathBuf,
    pattern: Pattern,
    recursive: bool,
}

impl DirectoryScanner {
    pub fn new<P: AsRef<Path>>(
        input_directory: P,
        pattern: &str,
        recursive: bool,
    ) -> Result<Self, WorkerError> {
        let pattern = Pattern::new(pattern).map_err(|e| WorkerError::InvalidPattern {
            pattern: pattern.to_string(),
            source: e,
        })?;

        Ok(Self {
            input_directory: input_directory.as_ref().to_path_buf(),
            pattern,
            recursive,
        })
    }

    pub fn input_directory(&self) -> &Path {
        &self.input_directory
    }

    /// Returns matching files sorted by path.
    pub fn scan(&self) -> Result<Vec<PathBuf>, WorkerError> {
        if !self.input_directory.is_dir() {
            return Err(WorkerError::InputNotFound(self.input_directory.clone()));
        }

        let mut walker = WalkDir::new(&self.input_directory).min_depth(1);
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| WorkerError::ScanFailed {
                path: self.input_directory.clone(),
                source: e,
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let matches = entry
                .file_name()
                .to_str()
                .map(|name| self.pattern.matches(name))
                .unwrap_or(false);

            if matches {
                debug!("Found input: {}", entry.path().display());
                files.push(entry.into_path());
            }
        }

        files.sort();

        info!(
            "Scanned {} matching files in {}",
            files.len(),
            self.input_directory.display()
        );
        Ok(files)
    }
}
