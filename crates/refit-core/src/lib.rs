//! Update-execution engine for refit.
//!
//! This crate replaces an installed application's files with the contents of
//! a release archive that is already on local disk:
//! - Wildcard matching and path helpers (`matcher`).
//! - ZIP listing, creation and extraction with skip-levels and exclusions.
//! - Recursive directory scanning and best-effort deletion with pruning.
//! - Dated backup archives and backup retention.
//! - The `check -> backup -> purge -> extract` pipeline.
//!
//! Everything here is synchronous and blocking. Callers are responsible for
//! keeping other processes away from the target directory during a run.

pub mod archive;
pub mod backup;
mod config;
mod error;
pub mod matcher;
mod pipeline;
pub mod tree;

/// Scoped read/create/extract on one ZIP file.
pub use archive::ArchiveEngine;
/// Dated backups and retention.
pub use backup::{BackupManager, BackupRecord};
/// Serializable configuration for one update run.
pub use config::UpdateConfig;
/// Error type shared by every engine component.
pub use error::{ErrorCategory, UpdateError};
/// Staged update pipeline, stage names and its counter report.
pub use pipeline::{PipelineReport, Stage, UpdatePipeline};
/// Recursive directory scanner.
pub use tree::FileTreeScanner;
