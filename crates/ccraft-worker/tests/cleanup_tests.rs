//! Temp-file sweeper.

mod common;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ccraft_queue::{CleanupJob, JobProcessor, QueueJob};
use ccraft_worker::stages::{sweep_dir, sweep_dir_with};
use ccraft_worker::{CleanupProcessor, SweepReport};

use common::{envelope, files_in};

const MAX_AGE: Duration = Duration::from_secs(300);

fn write_file(dir: &Path, name: &str, age: Duration) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
    path
}

#[tokio::test]
async fn sweep_deletes_only_files_past_max_age() {
    let dir = tempfile::tempdir().unwrap();
    let old = write_file(dir.path(), "v1.mp3", Duration::from_secs(600));
    let young = write_file(dir.path(), "v2.mp3", Duration::from_secs(10));

    let report = sweep_dir(dir.path(), MAX_AGE).await.unwrap();

    assert_eq!(
        report,
        SweepReport {
            scanned: 2,
            deleted: 1,
            failed: 0
        }
    );
    assert!(!old.exists());
    assert!(young.exists());
}

#[tokio::test]
async fn sweep_skips_directories() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    let now = SystemTime::now() + Duration::from_secs(3600);

    let report = sweep_dir_with(dir.path(), MAX_AGE, now, |path| async move {
        tokio::fs::remove_file(path).await
    })
    .await
    .unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.deleted, 0);
    assert!(dir.path().join("nested").exists());
}

#[tokio::test]
async fn failed_delete_does_not_stop_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.srt", "b.srt", "c.srt"] {
        write_file(dir.path(), name, Duration::from_secs(600));
    }

    let report = sweep_dir_with(dir.path(), MAX_AGE, SystemTime::now(), |path| async move {
        if path.file_name().is_some_and(|n| n == "b.srt") {
            return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"));
        }
        tokio::fs::remove_file(path).await
    })
    .await
    .unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(files_in(dir.path()).await, vec![dir.path().join("b.srt")]);
}

#[tokio::test]
async fn missing_directory_is_an_empty_sweep() {
    let dir = tempfile::tempdir().unwrap();

    let report = sweep_dir(&dir.path().join("never-created"), MAX_AGE)
        .await
        .unwrap();

    assert_eq!(report, SweepReport::default());
}

#[tokio::test]
async fn cleanup_processor_sweeps_configured_dir() {
    let dir = tempfile::tempdir().unwrap();
    let old = write_file(dir.path(), "v1_burned.mp4", Duration::from_secs(900));
    let young = write_file(dir.path(), "v2.srt", Duration::ZERO);
    let processor = CleanupProcessor::new(dir.path(), MAX_AGE);

    processor
        .process(&envelope(QueueJob::CleanTempFiles(CleanupJob::now())))
        .await
        .unwrap();

    assert!(!old.exists());
    assert!(young.exists());
}
