use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use log::{info, warn};
use serde::Serialize;

use crate::archive::ArchiveEngine;
use crate::error::UpdateError;
use crate::tree::FileTreeScanner;

pub const DEFAULT_DATE_FORMAT: &str = "%Y_%m_%d_%H%M%S";

/// A backup archive written by [`BackupManager::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub filename: PathBuf,
    pub added_count: usize,
}

impl BackupRecord {
    /// Creation time of the archive, read from the filesystem.
    ///
    /// # Errors
    /// Returns an error when the file's metadata cannot be read.
    pub fn created_at(&self) -> Result<DateTime<Local>, UpdateError> {
        let metadata = std::fs::metadata(&self.filename).map_err(|error| {
            UpdateError::io_with_path("failed to read backup metadata", &self.filename, &error)
        })?;
        Ok(DateTime::from(created_time(&metadata, &self.filename)?))
    }
}

/// Dated snapshot archives of a source directory, plus listing and retention
/// of the archives already written to the backup directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    source_directory: PathBuf,
    backup_directory: PathBuf,
    filename: Option<PathBuf>,
    exclusions: Vec<String>,
    date_format: String,
}

impl BackupManager {
    pub fn new(source_directory: impl Into<PathBuf>, backup_directory: impl Into<PathBuf>) -> Self {
        Self {
            source_directory: source_directory.into(),
            backup_directory: backup_directory.into(),
            filename: None,
            exclusions: Vec::new(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    /// Write to `filename` instead of a date-derived name.
    #[must_use]
    pub fn with_filename(mut self, filename: Option<PathBuf>) -> Self {
        self.filename = filename;
        self
    }

    #[must_use]
    pub fn with_exclusions<S: AsRef<str>>(mut self, exclusions: &[S]) -> Self {
        self.exclusions = exclusions.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// `chrono` strftime format used by [`BackupManager::make_filename`].
    #[must_use]
    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    #[must_use]
    pub fn backup_directory(&self) -> &Path {
        &self.backup_directory
    }

    /// Snapshot the source directory into a new archive.
    ///
    /// Never overwrites an existing file. When anything after the existence
    /// check fails, a partially written archive is removed before the error
    /// is returned.
    ///
    /// # Errors
    /// Returns [`UpdateError::BackupExists`] when the resolved filename is
    /// taken, and propagates scan and archive errors.
    pub fn create(&self) -> Result<BackupRecord, UpdateError> {
        let filename = match &self.filename {
            Some(filename) => filename.clone(),
            None => self.make_filename()?,
        };

        if filename.exists() {
            return Err(UpdateError::BackupExists { path: filename });
        }

        info!(
            "Backing up {} to {}",
            self.source_directory.display(),
            filename.display()
        );

        match self.write_archive(&filename) {
            Ok(added_count) => Ok(BackupRecord {
                filename,
                added_count,
            }),
            Err(error) => {
                // BackupExists here means another writer claimed the name first.
                if !matches!(error, UpdateError::BackupExists { .. })
                    && filename.exists()
                    && let Err(remove_error) = std::fs::remove_file(&filename)
                {
                    warn!(
                        "Failed to remove partial backup {}: {remove_error}",
                        filename.display()
                    );
                }
                Err(error)
            }
        }
    }

    fn write_archive(&self, filename: &Path) -> Result<usize, UpdateError> {
        let entries: Vec<PathBuf> = FileTreeScanner::new(&self.source_directory)
            .with_exclusions(&self.exclusions)
            .scan()?
            .collect::<Result<_, _>>()?;

        ArchiveEngine::new(filename).create(&entries, &self.source_directory)
    }

    /// `*.zip` files directly inside the backup directory, newest first.
    ///
    /// # Errors
    /// Returns an error when the backup directory is missing or unreadable.
    pub fn list_all(&self) -> Result<Vec<PathBuf>, UpdateError> {
        if !self.backup_directory.is_dir() {
            return Err(UpdateError::invalid_directory(&self.backup_directory));
        }

        let read_dir = std::fs::read_dir(&self.backup_directory).map_err(|error| {
            UpdateError::io_with_path("failed to list backups", &self.backup_directory, &error)
        })?;

        let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|error| UpdateError::io("failed to list backups", error))?;
            let path = entry.path();
            if path.extension().is_none_or(|extension| extension != "zip") {
                continue;
            }
            let metadata = entry.metadata().map_err(|error| {
                UpdateError::io_with_path("failed to read backup metadata", &path, &error)
            })?;
            if !metadata.is_file() {
                continue;
            }
            backups.push((created_time(&metadata, &path)?, path));
        }

        backups.sort_by(|(a_time, a_path), (b_time, b_path)| {
            b_time.cmp(a_time).then_with(|| b_path.cmp(a_path))
        });

        Ok(backups.into_iter().map(|(_, path)| path).collect())
    }

    /// Keep the newest `max_to_keep` backups and delete the rest.
    ///
    /// Best-effort: a backup that cannot be deleted is logged and skipped.
    /// Returns how many were deleted.
    ///
    /// # Errors
    /// Returns an error when the backups cannot be listed.
    pub fn reduce(&self, max_to_keep: usize) -> Result<usize, UpdateError> {
        let mut deleted = 0;
        for path in self.list_all()?.iter().skip(max_to_keep) {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    info!("Removed old backup {}", path.display());
                    deleted += 1;
                }
                Err(error) => warn!("Failed to remove old backup {}: {error}", path.display()),
            }
        }
        Ok(deleted)
    }

    /// `<backup directory>/<now in the date format>.zip`.
    ///
    /// # Errors
    /// Returns an error when the backup directory is not a directory or the
    /// date format is invalid.
    pub fn make_filename(&self) -> Result<PathBuf, UpdateError> {
        if !self.backup_directory.is_dir() {
            return Err(UpdateError::invalid_directory(&self.backup_directory));
        }

        let mut name = String::new();
        write!(name, "{}.zip", Local::now().format(&self.date_format)).map_err(|_| {
            UpdateError::InvalidDateFormat {
                format: self.date_format.clone(),
            }
        })?;

        Ok(self.backup_directory.join(name))
    }
}

fn created_time(metadata: &std::fs::Metadata, path: &Path) -> Result<SystemTime, UpdateError> {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map_err(|error| UpdateError::io_with_path("failed to read backup time", path, &error))
}
