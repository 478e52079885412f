//! Per-user locations of refit's own files: settings, log and run lock.

mod paths;

pub use paths::{AppPaths, AppPathsError};
