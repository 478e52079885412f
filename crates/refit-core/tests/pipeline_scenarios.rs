use std::collections::BTreeSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use refit_core::{ArchiveEngine, BackupManager, UpdateConfig, UpdateError, UpdatePipeline};
use tempfile::tempdir;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).expect("add directory");
        } else {
            writer.start_file(*name, options).expect("start file");
            writer.write_all(content).expect("write file");
        }
    }
    writer.finish().expect("finish zip");
}

fn seed_target(target: &Path) {
    std::fs::create_dir_all(target.join("sub")).expect("create target");
    std::fs::write(target.join("a.txt"), b"old a").expect("write a.txt");
    std::fs::write(target.join("sub/b.txt"), b"old b").expect("write b.txt");
}

fn layout(root: &Path) -> UpdateConfig {
    let target = root.join("app");
    let backups = root.join("backups");
    std::fs::create_dir_all(&target).expect("create app dir");
    std::fs::create_dir_all(&backups).expect("create backup dir");
    UpdateConfig::new(root.join("release.zip"), target, backups)
}

fn tree_snapshot(root: &Path) -> BTreeSet<(PathBuf, Option<Vec<u8>>)> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| {
            let entry = entry.expect("walk tree");
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("strip root")
                .to_path_buf();
            let content = entry
                .file_type()
                .is_file()
                .then(|| std::fs::read(entry.path()).expect("read file"));
            (relative, content)
        })
        .collect()
}

#[test]
fn full_update_replaces_target_and_keeps_a_backup() {
    let temp = tempdir().expect("create temp dir");
    let config = layout(temp.path());
    seed_target(&config.target_directory);
    write_zip(
        &config.source_filename,
        &[
            ("a.txt", b"new a"),
            ("sub/b.txt", b"new b"),
            ("c.txt", b"new c"),
        ],
    );
    let target = config.target_directory.clone();
    let mut pipeline = UpdatePipeline::new(config);

    pipeline.check().expect("check passes");
    pipeline.backup().expect("backup succeeds");
    assert_eq!(pipeline.backup_count(), 3);
    let backup = pipeline
        .backup_filename()
        .expect("backup filename recorded")
        .to_path_buf();
    assert_eq!(
        ArchiveEngine::new(&backup)
            .read::<&str>(&[])
            .expect("read backup"),
        vec!["a.txt", "sub/", "sub/b.txt"]
    );

    pipeline.purge().expect("purge succeeds");
    assert_eq!(pipeline.deleted_count(), 3);
    assert_eq!(std::fs::read_dir(&target).expect("list target").count(), 0);

    pipeline.extract().expect("extract succeeds");
    assert_eq!(pipeline.extracted_count(), 3);
    assert_eq!(std::fs::read(target.join("a.txt")).expect("read a"), b"new a");
    assert_eq!(std::fs::read(target.join("sub/b.txt")).expect("read b"), b"new b");
    assert_eq!(std::fs::read(target.join("c.txt")).expect("read c"), b"new c");
}

#[test]
fn skip_levels_strip_the_release_folder() {
    let temp = tempdir().expect("create temp dir");
    let mut config = layout(temp.path());
    config.skip_levels = 1;
    write_zip(
        &config.source_filename,
        &[("pkg/a.txt", b"a"), ("pkg/sub/b.txt", b"b")],
    );
    let target = config.target_directory.clone();

    UpdatePipeline::new(config).full().expect("update succeeds");

    assert!(target.join("a.txt").is_file());
    assert!(target.join("sub/b.txt").is_file());
    assert!(!target.join("pkg").exists());
}

#[test]
fn log_files_survive_purge_and_are_not_extracted() {
    let temp = tempdir().expect("create temp dir");
    let mut config = layout(temp.path());
    config.purge_exclusions = vec!["*.log".to_string()];
    config.extract_exclusions = vec!["*.log".to_string()];
    seed_target(&config.target_directory);
    std::fs::write(config.target_directory.join("debug.log"), b"local log").expect("write log");
    write_zip(
        &config.source_filename,
        &[("a.txt", b"new a"), ("debug.log", b"shipped log")],
    );
    let target = config.target_directory.clone();
    let mut pipeline = UpdatePipeline::new(config);

    pipeline.full().expect("update succeeds");

    assert_eq!(
        std::fs::read(target.join("debug.log")).expect("read log"),
        b"local log"
    );
    assert_eq!(pipeline.deleted_count(), 3);
    assert_eq!(pipeline.extracted_count(), 1);
    assert_eq!(
        pipeline.read_archive().expect("read archive"),
        vec!["a.txt"]
    );
}

#[test]
fn existing_backup_is_never_overwritten() {
    let temp = tempdir().expect("create temp dir");
    let source = temp.path().join("app");
    seed_target(&source);
    let filename = temp.path().join("2024_01_01_000000.zip");
    std::fs::write(&filename, b"earlier backup").expect("write earlier backup");

    let manager = BackupManager::new(&source, temp.path()).with_filename(Some(filename.clone()));
    let before = tree_snapshot(&source);

    let result = manager.create();

    assert!(matches!(result, Err(UpdateError::BackupExists { .. })));
    assert_eq!(std::fs::read(&filename).expect("read backup"), b"earlier backup");
    assert_eq!(tree_snapshot(&source), before);
}

#[cfg(unix)]
#[test]
fn lost_backup_entry_aborts_the_update_and_removes_the_partial_archive() {
    let temp = tempdir().expect("create temp dir");
    let mut config = layout(temp.path());
    seed_target(&config.target_directory);
    std::os::unix::fs::symlink(
        config.target_directory.join("missing.txt"),
        config.target_directory.join("broken-link"),
    )
    .expect("create dangling symlink");
    let backup = config.backup_directory.join("before-update.zip");
    config.backup_filename = Some(backup.clone());
    write_zip(&config.source_filename, &[("a.txt", b"new a")]);
    let target = config.target_directory.clone();
    let before = tree_snapshot(&target);
    let mut pipeline = UpdatePipeline::new(config);

    let result = pipeline.full();

    assert!(matches!(
        result,
        Err(ref error @ UpdateError::EntryCountMismatch { .. })
            if error.category() == refit_core::ErrorCategory::Consistency
    ));
    assert!(!backup.exists());
    assert_eq!(tree_snapshot(&target), before);
    assert_eq!(pipeline.deleted_count(), 0);
}

#[test]
fn failed_check_leaves_target_untouched() {
    let temp = tempdir().expect("create temp dir");
    let config = layout(temp.path());
    seed_target(&config.target_directory);
    write_zip(&config.source_filename, &[("../escape.txt", b"evil")]);
    let target = config.target_directory.clone();
    let backups = config.backup_directory.clone();
    let before = tree_snapshot(&target);

    let result = UpdatePipeline::new(config).full();

    assert!(matches!(result, Err(UpdateError::UnsafeEntryPath { .. })));
    assert_eq!(tree_snapshot(&target), before);
    assert_eq!(std::fs::read_dir(&backups).expect("list backups").count(), 0);
    assert!(!temp.path().join("escape.txt").exists());
}

#[test]
fn backup_round_trips_through_read() {
    let temp = tempdir().expect("create temp dir");
    let source = temp.path().join("app");
    seed_target(&source);
    std::fs::create_dir_all(source.join("empty")).expect("create empty dir");
    let backups = temp.path().join("backups");
    std::fs::create_dir_all(&backups).expect("create backup dir");

    let record = BackupManager::new(&source, &backups)
        .create()
        .expect("create backup");
    let listed: BTreeSet<String> = ArchiveEngine::new(&record.filename)
        .read::<&str>(&[])
        .expect("read backup")
        .into_iter()
        .collect();

    let expected: BTreeSet<String> = ["a.txt", "empty/", "sub/", "sub/b.txt"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(listed, expected);
    assert_eq!(record.added_count, 4);
}

#[test]
fn restoring_a_backup_reproduces_the_original_tree() {
    let temp = tempdir().expect("create temp dir");
    let mut config = layout(temp.path());
    seed_target(&config.target_directory);
    config.backup_filename = Some(config.backup_directory.join("restore-point.zip"));
    write_zip(&config.source_filename, &[("only.txt", b"new")]);
    let target = config.target_directory.clone();
    let before = tree_snapshot(&target);
    let mut pipeline = UpdatePipeline::new(config.clone());
    pipeline.full().expect("update succeeds");
    assert_ne!(tree_snapshot(&target), before);

    let mut rollback = UpdateConfig::new(
        config.backup_directory.join("restore-point.zip"),
        &target,
        &config.backup_directory,
    );
    rollback.backup_filename = Some(config.backup_directory.join("after-update.zip"));
    UpdatePipeline::new(rollback).full().expect("rollback succeeds");

    assert_eq!(tree_snapshot(&target), before);
}
