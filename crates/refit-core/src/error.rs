use std::path::{Path, PathBuf};

use thiserror::Error;

/// Broad classification of an [`UpdateError`], used by callers to decide
/// whether anything destructive may already have happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Raised before any destructive action.
    Validation,
    /// A target path could not be written or created.
    Permission,
    /// The archive layer silently dropped data.
    Consistency,
    /// Underlying filesystem or archive I/O failed.
    Io,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Zip {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("Invalid directory {}", path.display())]
    InvalidDirectory { path: PathBuf },
    #[error("Archive {} has no entries to apply", path.display())]
    EmptyArchive { path: PathBuf },
    #[error("Backup file {} already exists", path.display())]
    BackupExists { path: PathBuf },
    #[error("Archive entry '{entry}' escapes the destination directory")]
    UnsafeEntryPath { entry: String },
    #[error("Unknown update stage '{0}'")]
    UnknownStage(String),
    #[error("Invalid backup filename date format '{format}'")]
    InvalidDateFormat { format: String },
    #[error("File {} is not writable", path.display())]
    NotWritable { path: PathBuf },
    #[error("Failed to create directory {} while extracting '{entry}': {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        entry: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to save {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "One or more items have not been added to {}: expected {expected}, found {actual}",
        path.display()
    )]
    EntryCountMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("Failed to create {}", path.display())]
    ArchiveMissing { path: PathBuf },
}

impl UpdateError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Zip { context, source }
    }

    pub(crate) fn io_with_path(
        context: &'static str,
        path: &Path,
        source: &std::io::Error,
    ) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    pub(crate) fn invalid_directory(path: &Path) -> Self {
        Self::InvalidDirectory {
            path: path.to_path_buf(),
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidDirectory { .. }
            | Self::EmptyArchive { .. }
            | Self::BackupExists { .. }
            | Self::UnsafeEntryPath { .. }
            | Self::UnknownStage(_)
            | Self::InvalidDateFormat { .. } => ErrorCategory::Validation,
            Self::NotWritable { .. } | Self::DirectoryCreation { .. } | Self::FileWrite { .. } => {
                ErrorCategory::Permission
            }
            Self::EntryCountMismatch { .. } | Self::ArchiveMissing { .. } => {
                ErrorCategory::Consistency
            }
            Self::Io { .. } | Self::Zip { .. } => ErrorCategory::Io,
        }
    }
}
