mod cli;
mod error;
mod logging;
mod run_lock;
mod settings;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use refit_core::{Stage, UpdateError, UpdatePipeline};
use refit_platform::{AppPaths, AppPathsError};

use crate::cli::Cli;
use crate::error::AppError;
use crate::run_lock::RunLock;
use crate::settings::AppSettings;

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            eprintln!("refit: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<(), AppError> {
    let paths = resolve_paths(args.root.as_deref(), args.settings.as_deref(), AppPaths::new)?;
    let settings_path = args.settings.unwrap_or_else(|| paths.settings_file());
    let settings = AppSettings::load(&settings_path)?;

    paths
        .ensure_dirs()
        .map_err(|error| AppError::io("failed to create app directories", error))?;
    logging::init_logging(
        &paths.log_file(),
        settings.debug_logging,
        settings.max_log_size_bytes,
    );
    info!("Using settings {}", settings_path.display());
    info!("Keeping log and lock files in {}", paths.data_dir.display());

    let _lock = RunLock::acquire(&paths.lock_file())?;

    let mut pipeline = UpdatePipeline::new(settings.update);
    let outcome = execute(&mut pipeline, args.stage);

    println!("{}", serde_json::to_string_pretty(&pipeline.report())?);

    outcome.map_err(|error| {
        error!(
            "{} stage failed ({:?}): {error}",
            args.stage,
            error.category()
        );
        AppError::from(error)
    })
}

/// `--root` wins. Otherwise the per-user directories are used, and when they
/// cannot be determined an explicit settings file's directory stands in.
fn resolve_paths(
    root: Option<&Path>,
    settings: Option<&Path>,
    platform: impl FnOnce() -> Result<AppPaths, AppPathsError>,
) -> Result<AppPaths, AppError> {
    if let Some(root) = root {
        return Ok(AppPaths::in_dir(root));
    }

    match (platform(), settings) {
        (Ok(paths), _) => Ok(paths),
        (Err(_), Some(settings)) => {
            let parent = settings
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            Ok(AppPaths::in_dir(parent))
        }
        (Err(error), None) => Err(error.into()),
    }
}

/// Run `stage`, then apply backup retention when the stage wrote a backup.
fn execute(pipeline: &mut UpdatePipeline, stage: Stage) -> Result<(), UpdateError> {
    pipeline.run(stage)?;

    if matches!(stage, Stage::Full | Stage::Backup) {
        let removed = pipeline.prune_backups()?;
        if removed > 0 {
            info!("Pruned {removed} old backups");
        }
    }

    Ok(())
}
