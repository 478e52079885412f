use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use log::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::UpdateError;
use crate::matcher::{matches_any, normalize, normalize_all, to_relative};

/// Recursive traversal of one directory with pruning exclusions.
///
/// A node is excluded when either its full path or its path relative to the
/// scanned directory matches a pattern. An excluded directory is never
/// descended into.
#[derive(Debug, Clone)]
pub struct FileTreeScanner {
    directory: PathBuf,
    exclusions: Vec<String>,
}

impl FileTreeScanner {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            exclusions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_exclusions<S: AsRef<str>>(mut self, exclusions: &[S]) -> Self {
        self.exclusions = normalize_all(exclusions);
        self
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Lazily yield every non-excluded node, parents before children, in
    /// file-name order.
    ///
    /// # Errors
    /// Fails before traversal when the directory is missing or is not a
    /// directory. Individual items carry traversal errors.
    pub fn scan(
        &self,
    ) -> Result<impl Iterator<Item = Result<PathBuf, UpdateError>> + '_, UpdateError> {
        Ok(self
            .walk()?
            .map(|entry| entry.map(DirEntry::into_path).map_err(walk_error)))
    }

    /// Remove every non-excluded node, children before parents.
    ///
    /// Best-effort: a node that cannot be read or removed is skipped and only
    /// lowers the returned count.
    ///
    /// # Errors
    /// Fails before traversal when the directory is missing or is not a
    /// directory.
    pub fn delete(&self) -> Result<usize, UpdateError> {
        let nodes: Vec<DirEntry> = self
            .walk()?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    debug!("Skipping unreadable node: {error}");
                    None
                }
            })
            .collect();

        let mut deleted = 0;
        for node in nodes.iter().rev() {
            let removed = if node.file_type().is_dir() {
                std::fs::remove_dir(node.path())
            } else {
                std::fs::remove_file(node.path())
            };
            match removed {
                Ok(()) => deleted += 1,
                Err(error) => debug!("Could not remove {}: {error}", node.path().display()),
            }
        }

        info!(
            "Deleted {deleted} of {} nodes under {}",
            nodes.len(),
            self.directory.display()
        );
        Ok(deleted)
    }

    fn walk(
        &self,
    ) -> Result<impl Iterator<Item = walkdir::Result<DirEntry>> + '_, UpdateError> {
        if !self.directory.is_dir() {
            return Err(UpdateError::invalid_directory(&self.directory));
        }

        Ok(WalkDir::new(&self.directory)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| entry.depth() == 0 || !self.is_excluded(entry.path())))
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.exclusions.is_empty() {
            return false;
        }

        let absolute = normalize(&path.to_string_lossy(), MAIN_SEPARATOR);
        if matches_any(&absolute, &self.exclusions) {
            return true;
        }

        let base = normalize(&self.directory.to_string_lossy(), MAIN_SEPARATOR);
        matches_any(&to_relative(&absolute, &base), &self.exclusions)
    }
}

fn walk_error(error: walkdir::Error) -> UpdateError {
    let path = error.path().map(Path::to_path_buf);
    let source = std::io::Error::from(error);
    match path {
        Some(path) => UpdateError::io_with_path("failed to scan directory", &path, &source),
        None => UpdateError::io("failed to scan directory", source),
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::FileTreeScanner;
    use crate::error::UpdateError;

    fn seed_tree(root: &Path) {
        std::fs::create_dir_all(root.join("sub")).expect("sub should be created");
        std::fs::create_dir_all(root.join("storage/logs")).expect("storage should be created");
        std::fs::write(root.join("a.txt"), b"a").expect("a.txt should be written");
        std::fs::write(root.join("sub/b.txt"), b"b").expect("b.txt should be written");
        std::fs::write(root.join("debug.log"), b"log").expect("debug.log should be written");
        std::fs::write(root.join("storage/logs/app.log"), b"log")
            .expect("app.log should be written");
    }

    fn relative(root: &Path, paths: Vec<PathBuf>) -> Vec<String> {
        paths
            .into_iter()
            .map(|path| {
                path.strip_prefix(root)
                    .expect("scanned path should live under root")
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn scan_yields_parents_before_children_in_name_order() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        seed_tree(temp.path());

        let paths: Vec<PathBuf> = FileTreeScanner::new(temp.path())
            .scan()
            .expect("scan should start")
            .collect::<Result<_, _>>()
            .expect("scan should succeed");

        assert_eq!(
            relative(temp.path(), paths),
            vec![
                "a.txt",
                "debug.log",
                "storage",
                "storage/logs",
                "storage/logs/app.log",
                "sub",
                "sub/b.txt",
            ]
        );
    }

    #[test]
    fn scan_prunes_excluded_directories() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        seed_tree(temp.path());
        let absolute_sub = temp.path().join("sub").to_string_lossy().into_owned();

        let paths: Vec<PathBuf> = FileTreeScanner::new(temp.path())
            .with_exclusions(&["storage".to_string(), absolute_sub, "*.log".to_string()])
            .scan()
            .expect("scan should start")
            .collect::<Result<_, _>>()
            .expect("scan should succeed");

        assert_eq!(relative(temp.path(), paths), vec!["a.txt"]);
    }

    #[test]
    fn scan_and_delete_reject_missing_directory() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let missing = temp.path().join("missing");
        let file = temp.path().join("file.txt");
        std::fs::write(&file, b"x").expect("file should be written");

        assert!(matches!(
            FileTreeScanner::new(&missing).scan().map(|_| ()),
            Err(UpdateError::InvalidDirectory { .. })
        ));
        assert!(matches!(
            FileTreeScanner::new(&file).delete(),
            Err(UpdateError::InvalidDirectory { .. })
        ));
    }

    #[test]
    fn delete_removes_every_node_and_counts_them() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        seed_tree(temp.path());

        let deleted = FileTreeScanner::new(temp.path())
            .delete()
            .expect("delete should succeed");

        assert_eq!(deleted, 7);
        assert!(temp.path().is_dir());
        assert_eq!(
            std::fs::read_dir(temp.path())
                .expect("root should be readable")
                .count(),
            0
        );
    }

    #[test]
    fn delete_keeps_excluded_nodes_and_their_contents() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        seed_tree(temp.path());

        let deleted = FileTreeScanner::new(temp.path())
            .with_exclusions(&["storage", "*.log"])
            .delete()
            .expect("delete should succeed");

        assert_eq!(deleted, 3);
        assert!(temp.path().join("debug.log").is_file());
        assert!(temp.path().join("storage/logs/app.log").is_file());
        assert!(!temp.path().join("sub").exists());
        assert!(!temp.path().join("a.txt").exists());
    }

    #[test]
    fn delete_tolerates_directories_that_cannot_be_removed() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        seed_tree(temp.path());
        std::fs::write(temp.path().join("sub/keep.me"), b"keep")
            .expect("keep.me should be written");

        let deleted = FileTreeScanner::new(temp.path())
            .with_exclusions(&["*keep.me", "storage"])
            .delete()
            .expect("delete should succeed");

        // "sub" still holds keep.me, so only a.txt, debug.log and sub/b.txt go.
        assert_eq!(deleted, 3);
        assert!(temp.path().join("sub/keep.me").is_file());
    }
}
