use std::fs::{File, OpenOptions};
use std::path::{Component, Path, PathBuf};

use log::{debug, info, warn};
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::UpdateError;
use crate::matcher::{matches_any, to_relative, to_separator};

pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIRECTORY_MODE: u32 = 0o755;

/// Reads, creates and extracts a single ZIP file.
///
/// Every operation opens the archive, works on it and drops the handle before
/// returning, so no file descriptor outlives a call.
#[derive(Debug, Clone)]
pub struct ArchiveEngine {
    filename: PathBuf,
    skip_levels: usize,
    file_mode: u32,
    directory_mode: u32,
}

impl ArchiveEngine {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            skip_levels: 0,
            file_mode: DEFAULT_FILE_MODE,
            directory_mode: DEFAULT_DIRECTORY_MODE,
        }
    }

    /// Number of leading path segments stripped from every entry.
    #[must_use]
    pub fn with_skip_levels(mut self, levels: usize) -> Self {
        self.skip_levels = levels;
        self
    }

    /// Mode applied to every extracted file (Unix only).
    #[must_use]
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Mode used for directories created during extraction (Unix only).
    #[must_use]
    pub fn with_directory_mode(mut self, mode: u32) -> Self {
        self.directory_mode = mode;
        self
    }

    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    #[must_use]
    pub fn skip_levels(&self) -> usize {
        self.skip_levels
    }

    #[must_use]
    pub fn file_mode(&self) -> u32 {
        self.file_mode
    }

    #[must_use]
    pub fn directory_mode(&self) -> u32 {
        self.directory_mode
    }

    /// List entry paths in container order after skip-levels and exclusions.
    ///
    /// # Errors
    /// Returns an error when the archive cannot be opened or read, or when an
    /// entry path would escape the extraction root.
    pub fn read<S: AsRef<str>>(&self, exclusions: &[S]) -> Result<Vec<String>, UpdateError> {
        let mut archive = self.open()?;
        let mut content = Vec::with_capacity(archive.len());

        for index in 0..archive.len() {
            let name = archive
                .by_index_raw(index)
                .map_err(|error| UpdateError::zip("failed to read zip entry", error))?
                .name()
                .to_string();
            let Some(path) = self.entry_path(&name)? else {
                continue;
            };
            if is_excluded(&path, exclusions) {
                continue;
            }
            content.push(path);
        }

        debug!(
            "Read {} of {} entries from {}",
            content.len(),
            archive.len(),
            self.filename.display()
        );
        Ok(content)
    }

    /// Write `entries` into a new archive, naming each relative to
    /// `base_path`.
    ///
    /// Inputs that cannot be read are logged and left out; the final entry
    /// count check then turns that into an error.
    ///
    /// # Errors
    /// Returns [`UpdateError::BackupExists`] when the archive file already
    /// exists. Also fails when the file cannot be written, is missing once
    /// finalized, or holds a different number of entries than were supplied.
    pub fn create<P: AsRef<Path>>(
        &self,
        entries: &[P],
        base_path: &Path,
    ) -> Result<usize, UpdateError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.filename)
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::AlreadyExists {
                    UpdateError::BackupExists {
                        path: self.filename.clone(),
                    }
                } else {
                    UpdateError::io_with_path("failed to create zip file", &self.filename, &error)
                }
            })?;
        let mut writer = ZipWriter::new(file);
        let base = base_path.to_string_lossy();
        let mut added = 0;

        for entry in entries {
            let entry = entry.as_ref();
            // ZIP names always use "/" regardless of platform.
            let name = to_separator(&to_relative(&entry.to_string_lossy(), &base), '/');
            if add_entry(&mut writer, entry, &name)? {
                debug!("Added {name}");
                added += 1;
            }
        }

        writer
            .finish()
            .map_err(|error| UpdateError::zip("failed to finalize zip archive", error))?;

        if !self.filename.exists() {
            return Err(UpdateError::ArchiveMissing {
                path: self.filename.clone(),
            });
        }

        let actual = self.open()?.len();
        if actual != entries.len() {
            return Err(UpdateError::EntryCountMismatch {
                path: self.filename.clone(),
                expected: entries.len(),
                actual,
            });
        }

        info!("Created {} with {added} entries", self.filename.display());
        Ok(added)
    }

    /// Extract every non-excluded entry into `destination`.
    ///
    /// Fails fast: the first entry that cannot be materialized aborts the
    /// whole extraction, leaving later entries untouched.
    ///
    /// # Errors
    /// Returns an error when the archive cannot be read or a directory or
    /// file cannot be written. An entry path is unsafe when it leaves the
    /// destination or passes through a symlink already inside it.
    pub fn extract<S: AsRef<str>>(
        &self,
        destination: &Path,
        exclusions: &[S],
    ) -> Result<usize, UpdateError> {
        let mut archive = self.open()?;
        let mut extracted = 0;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|error| UpdateError::zip("failed to read zip entry", error))?;
            let Some(path) = self.entry_path(entry.name())? else {
                continue;
            };
            if is_excluded(&path, exclusions) {
                debug!("Skipping excluded entry {path}");
                continue;
            }

            let out_path = destination.join(path.trim_end_matches('/'));
            let is_directory = path.ends_with('/') || entry.is_dir();
            if crosses_symlink(destination, &path, !is_directory) {
                return Err(UpdateError::UnsafeEntryPath { entry: path });
            }

            if is_directory {
                if !out_path.is_dir() {
                    self.create_directory(&out_path)
                        .map_err(|source| UpdateError::DirectoryCreation {
                            path: out_path.clone(),
                            entry: path.clone(),
                            source,
                        })?;
                }
            } else {
                if let Some(parent) = out_path.parent()
                    && !parent.is_dir()
                {
                    self.create_directory(parent)
                        .map_err(|source| UpdateError::DirectoryCreation {
                            path: parent.to_path_buf(),
                            entry: path.clone(),
                            source,
                        })?;
                }

                let mut outfile =
                    File::create(&out_path).map_err(|source| UpdateError::FileWrite {
                        path: out_path.clone(),
                        source,
                    })?;
                std::io::copy(&mut entry, &mut outfile).map_err(|source| {
                    UpdateError::FileWrite {
                        path: out_path.clone(),
                        source,
                    }
                })?;
                set_mode(&out_path, self.file_mode).map_err(|source| UpdateError::FileWrite {
                    path: out_path.clone(),
                    source,
                })?;
            }

            debug!("Extracted {path}");
            extracted += 1;
        }

        info!(
            "Extracted {extracted} entries from {} to {}",
            self.filename.display(),
            destination.display()
        );
        Ok(extracted)
    }

    fn open(&self) -> Result<ZipArchive<File>, UpdateError> {
        let file = File::open(&self.filename).map_err(|error| {
            UpdateError::io_with_path("failed to open zip file", &self.filename, &error)
        })?;
        ZipArchive::new(file).map_err(|error| UpdateError::zip("failed to read zip archive", error))
    }

    /// Normalized, level-stripped path for an entry name, or `None` when
    /// nothing is left of it.
    fn entry_path(&self, name: &str) -> Result<Option<String>, UpdateError> {
        let path = skip_levels(&to_separator(name, '/'), self.skip_levels);
        if path.is_empty() {
            return Ok(None);
        }
        if !is_enclosed(&path) {
            return Err(UpdateError::UnsafeEntryPath {
                entry: name.to_string(),
            });
        }
        Ok(Some(path))
    }

    fn create_directory(&self, path: &Path) -> std::io::Result<()> {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(self.directory_mode);
        }
        builder.create(path)
    }
}

/// Drop the first `levels` `/`-separated segments of `path`.
#[must_use]
pub fn skip_levels(path: &str, levels: usize) -> String {
    if levels == 0 {
        return path.to_string();
    }
    path.split('/').skip(levels).collect::<Vec<_>>().join("/")
}

/// An entry is excluded when its own path, or the path of any directory
/// above it, matches one of the patterns.
fn is_excluded<S: AsRef<str>>(path: &str, exclusions: &[S]) -> bool {
    if exclusions.is_empty() {
        return false;
    }

    let trimmed = path.trim_end_matches('/');
    if matches_any(path, exclusions) || matches_any(trimmed, exclusions) {
        return true;
    }

    trimmed.match_indices('/').any(|(i, _)| {
        matches_any(&trimmed[..i], exclusions) || matches_any(&trimmed[..=i], exclusions)
    })
}

fn is_enclosed(path: &str) -> bool {
    !path.starts_with('/')
        && Path::new(path)
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Whether writing `path` under `destination` would go through an existing
/// symlink. The last segment only counts when `include_last` is set, since a
/// directory entry that is already a link needs nothing created.
fn crosses_symlink(destination: &Path, path: &str, include_last: bool) -> bool {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    let depth = if include_last {
        segments.len()
    } else {
        segments.len().saturating_sub(1)
    };

    let mut current = destination.to_path_buf();
    for segment in &segments[..depth] {
        current.push(segment);
        match std::fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => return true,
            Ok(_) => {}
            // Nothing below a missing node can exist yet.
            Err(_) => return false,
        }
    }
    false
}

fn add_entry(
    writer: &mut ZipWriter<File>,
    source: &Path,
    name: &str,
) -> Result<bool, UpdateError> {
    if name.is_empty() {
        warn!("Not archiving {}: it is the base directory", source.display());
        return Ok(false);
    }

    // Follows symlinks: a linked directory is stored as a directory entry.
    let metadata = match std::fs::metadata(source) {
        Ok(metadata) => metadata,
        Err(error) => {
            warn!("Not archiving {}: {error}", source.display());
            return Ok(false);
        }
    };
    let options = entry_options(&metadata);

    if metadata.is_dir() {
        return match writer.add_directory(name, options) {
            Ok(()) => Ok(true),
            Err(error) => {
                warn!("Failed to add directory entry {name}: {error}");
                Ok(false)
            }
        };
    }

    let mut input = match File::open(source) {
        Ok(file) => file,
        Err(error) => {
            warn!("Not archiving {}: {error}", source.display());
            return Ok(false);
        }
    };
    if let Err(error) = writer.start_file(name, options) {
        warn!("Failed to add file entry {name}: {error}");
        return Ok(false);
    }
    if let Err(error) = std::io::copy(&mut input, writer) {
        warn!("Failed to write file entry {name}: {error}");
        writer
            .abort_file()
            .map_err(|error| UpdateError::zip("failed to drop partial archive entry", error))?;
        return Ok(false);
    }
    Ok(true)
}

fn entry_options(metadata: &std::fs::Metadata) -> SimpleFileOptions {
    let options = SimpleFileOptions::default().large_file(metadata.len() >= u64::from(u32::MAX));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options.unix_permissions(metadata.permissions().mode() & 0o7777)
    }

    #[cfg(not(unix))]
    {
        options
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
