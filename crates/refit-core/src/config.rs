use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::archive::{DEFAULT_DIRECTORY_MODE, DEFAULT_FILE_MODE};
use crate::backup::DEFAULT_DATE_FORMAT;

/// Everything an [`UpdatePipeline`](crate::UpdatePipeline) needs to know
/// about one update run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Release archive already on local disk.
    pub source_filename: PathBuf,
    /// Installed application directory that gets replaced.
    pub target_directory: PathBuf,
    pub backup_directory: PathBuf,

    /// Overrides the date-derived backup filename.
    #[serde(default)]
    pub backup_filename: Option<PathBuf>,

    #[serde(default)]
    pub backup_exclusions: Vec<String>,

    /// Paths that survive the purge, typically user data and configuration.
    #[serde(default)]
    pub purge_exclusions: Vec<String>,

    /// Applies to both the pre-flight check and extraction.
    #[serde(default)]
    pub extract_exclusions: Vec<String>,

    #[serde(default)]
    pub skip_levels: usize,

    #[serde(default = "default_file_permissions")]
    pub file_permissions: u32,

    #[serde(default = "default_directory_permissions")]
    pub directory_permissions: u32,

    #[serde(default = "default_date_format")]
    pub backup_filename_date_format: String,

    /// Backups kept after a successful run; `None` keeps all of them.
    #[serde(default)]
    pub max_backups: Option<usize>,
}

fn default_file_permissions() -> u32 {
    DEFAULT_FILE_MODE
}

fn default_directory_permissions() -> u32 {
    DEFAULT_DIRECTORY_MODE
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

impl UpdateConfig {
    pub fn new(
        source_filename: impl Into<PathBuf>,
        target_directory: impl Into<PathBuf>,
        backup_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_filename: source_filename.into(),
            target_directory: target_directory.into(),
            backup_directory: backup_directory.into(),
            backup_filename: None,
            backup_exclusions: Vec::new(),
            purge_exclusions: Vec::new(),
            extract_exclusions: Vec::new(),
            skip_levels: 0,
            file_permissions: default_file_permissions(),
            directory_permissions: default_directory_permissions(),
            backup_filename_date_format: default_date_format(),
            max_backups: None,
        }
    }
}
