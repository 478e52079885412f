use std::path::PathBuf;

use clap::Parser;
use refit_core::Stage;

#[derive(Debug, Parser)]
#[command(
    name = "refit",
    version,
    about = "Replace an installed application with a release archive on local disk",
    long_about = "Runs the update pipeline against the directories named in the settings \
                  file: check the archive, back up the target, purge it and extract the \
                  release into it. Prints the pipeline report as JSON on stdout."
)]
pub struct Cli {
    /// Stage to run: full, check, backup, purge or extract
    #[arg(default_value = "full")]
    pub stage: Stage,

    /// Settings file to use instead of the per-user one
    #[arg(long, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Keep settings, log and lock files under DIR instead of the per-user
    /// directories
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}
