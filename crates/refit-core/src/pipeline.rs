use std::collections::HashSet;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;
use serde::Serialize;

use crate::archive::ArchiveEngine;
use crate::backup::BackupManager;
use crate::config::UpdateConfig;
use crate::error::UpdateError;
use crate::tree::FileTreeScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Full,
    Check,
    Backup,
    Purge,
    Extract,
}

impl Stage {
    pub const ALL: [Self; 5] = [
        Self::Full,
        Self::Check,
        Self::Backup,
        Self::Purge,
        Self::Extract,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Check => "check",
            Self::Backup => "backup",
            Self::Purge => "purge",
            Self::Extract => "extract",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UpdateError::UnknownStage(s.to_string()))
    }
}

/// Counters left behind by the stages that have run so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub source_filename: PathBuf,
    pub target_directory: PathBuf,
    pub backup_filename: Option<PathBuf>,
    pub backup_count: usize,
    pub deleted_count: usize,
    pub extracted_count: usize,
}

/// Replaces the contents of one target directory with one release archive.
///
/// Stages run `check -> backup -> purge -> extract`. Each stage can be run on
/// its own; [`UpdatePipeline::full`] runs all four and stops at the first
/// error without rolling anything back. Counters are overwritten by the stage
/// that owns them and never reset.
#[derive(Debug)]
pub struct UpdatePipeline {
    config: UpdateConfig,
    archive: ArchiveEngine,
    scanner: FileTreeScanner,
    backups: BackupManager,
    backup_filename: Option<PathBuf>,
    backup_count: usize,
    deleted_count: usize,
    extracted_count: usize,
}

impl UpdatePipeline {
    pub fn new(config: UpdateConfig) -> Self {
        let archive = ArchiveEngine::new(&config.source_filename)
            .with_skip_levels(config.skip_levels)
            .with_file_mode(config.file_permissions)
            .with_directory_mode(config.directory_permissions);
        let scanner = FileTreeScanner::new(&config.target_directory)
            .with_exclusions(&config.purge_exclusions);
        let backups = BackupManager::new(&config.target_directory, &config.backup_directory)
            .with_filename(config.backup_filename.clone())
            .with_exclusions(&config.backup_exclusions)
            .with_date_format(config.backup_filename_date_format.clone());

        Self {
            config,
            archive,
            scanner,
            backups,
            backup_filename: None,
            backup_count: 0,
            deleted_count: 0,
            extracted_count: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    #[must_use]
    pub fn backup_filename(&self) -> Option<&Path> {
        self.backup_filename.as_deref()
    }

    #[must_use]
    pub fn backup_count(&self) -> usize {
        self.backup_count
    }

    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted_count
    }

    #[must_use]
    pub fn extracted_count(&self) -> usize {
        self.extracted_count
    }

    /// Entries `check` and `extract` operate on, after skip-levels and
    /// extract exclusions.
    ///
    /// # Errors
    /// Propagates [`ArchiveEngine::read`] errors.
    pub fn read_archive(&self) -> Result<Vec<String>, UpdateError> {
        self.archive.read(&self.config.extract_exclusions)
    }

    /// Pre-flight validation. Never touches the target directory.
    ///
    /// # Errors
    /// Fails when the target is not a directory, the archive is unreadable or
    /// lists nothing, or a path it would overwrite is not writable.
    pub fn check(&self) -> Result<(), UpdateError> {
        let target = &self.config.target_directory;
        if !target.is_dir() {
            return Err(UpdateError::invalid_directory(target));
        }

        let content = self.read_archive()?;
        if content.is_empty() {
            return Err(UpdateError::EmptyArchive {
                path: self.config.source_filename.clone(),
            });
        }

        // Entries that do not exist yet are checked against the nearest
        // directory above them that does.
        let mut checked = HashSet::new();
        for path in &content {
            let candidate = target.join(path.trim_end_matches('/'));
            let existing = candidate
                .ancestors()
                .find(|ancestor| ancestor.exists())
                .unwrap_or(target.as_path())
                .to_path_buf();
            if checked.insert(existing.clone()) && !is_writable(&existing) {
                return Err(UpdateError::NotWritable { path: existing });
            }
        }

        info!(
            "Check passed: {} entries can be written to {}",
            content.len(),
            target.display()
        );
        Ok(())
    }

    /// # Errors
    /// Propagates [`BackupManager::create`] errors.
    pub fn backup(&mut self) -> Result<(), UpdateError> {
        let record = self.backups.create()?;
        info!(
            "Backup {} holds {} entries",
            record.filename.display(),
            record.added_count
        );
        self.backup_count = record.added_count;
        self.backup_filename = Some(record.filename);
        Ok(())
    }

    /// # Errors
    /// Fails only when the target is not a directory; removal failures just
    /// lower the count.
    pub fn purge(&mut self) -> Result<(), UpdateError> {
        self.deleted_count = self.scanner.delete()?;
        info!(
            "Purged {} nodes from {}",
            self.deleted_count,
            self.config.target_directory.display()
        );
        Ok(())
    }

    /// # Errors
    /// Propagates the first [`ArchiveEngine::extract`] failure.
    pub fn extract(&mut self) -> Result<(), UpdateError> {
        self.extracted_count = self
            .archive
            .extract(&self.config.target_directory, &self.config.extract_exclusions)?;
        Ok(())
    }

    /// # Errors
    /// Returns the first stage error; later stages do not run.
    pub fn full(&mut self) -> Result<(), UpdateError> {
        self.check()?;
        self.backup()?;
        self.purge()?;
        self.extract()?;
        info!(
            "Updated {} from {}",
            self.config.target_directory.display(),
            self.config.source_filename.display()
        );
        Ok(())
    }

    /// # Errors
    /// Returns the error of the dispatched stage.
    pub fn run(&mut self, stage: Stage) -> Result<(), UpdateError> {
        info!("Running {stage} stage");
        match stage {
            Stage::Full => self.full(),
            Stage::Check => self.check(),
            Stage::Backup => self.backup(),
            Stage::Purge => self.purge(),
            Stage::Extract => self.extract(),
        }
    }

    /// Apply the configured backup retention. Returns how many backups were
    /// deleted.
    ///
    /// # Errors
    /// Returns an error when the backup directory cannot be listed.
    pub fn prune_backups(&self) -> Result<usize, UpdateError> {
        match self.config.max_backups {
            Some(max) => self.backups.reduce(max),
            None => Ok(0),
        }
    }

    #[must_use]
    pub fn report(&self) -> PipelineReport {
        PipelineReport {
            source_filename: self.config.source_filename.clone(),
            target_directory: self.config.target_directory.clone(),
            backup_filename: self.backup_filename.clone(),
            backup_count: self.backup_count,
            deleted_count: self.deleted_count,
            extracted_count: self.extracted_count,
        }
    }
}

/// Directories must both carry a write bit and accept a new file from this
/// process. The temporary file used for the latter is never linked in.
fn is_writable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            !metadata.permissions().readonly() && tempfile::tempfile_in(path).is_ok()
        }
        Ok(_) => OpenOptions::new().write(true).open(path).is_ok(),
        Err(_) => false,
    }
}
