//! Temp-file sweeper.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ccraft_queue::{JobEnvelope, JobFailure, JobProcessor, QueueJob, QueueName};

use crate::error::WorkerError;
use crate::stages::unexpected_job;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Directory entries looked at
    pub scanned: usize,
    pub deleted: usize,
    /// Entries that could not be inspected or deleted
    pub failed: usize,
}

/// Delete files in `dir` older than `max_age`.
pub async fn sweep_dir(dir: &Path, max_age: Duration) -> std::io::Result<SweepReport> {
    sweep_dir_with(dir, max_age, SystemTime::now(), |path| async move {
        tokio::fs::remove_file(path).await
    })
    .await
}

/// [`sweep_dir`] with an explicit clock and delete operation.
///
/// A missing directory is an empty sweep. Per-file errors are logged and
/// counted; they never stop the scan.
pub async fn sweep_dir_with<F, Fut>(
    dir: &Path,
    max_age: Duration,
    now: SystemTime,
    mut remove: F,
) -> std::io::Result<SweepReport>
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut report = SweepReport::default();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Temp dir {} does not exist, nothing to sweep", dir.display());
            return Ok(report);
        }
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        report.scanned += 1;
        let path = entry.path();

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Could not inspect {}: {}", path.display(), e);
                report.failed += 1;
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }

        match remove(path.clone()).await {
            Ok(()) => {
                info!("Deleted old temporary file: {}", path.display());
                report.deleted += 1;
            }
            Err(e) => {
                warn!("Could not delete {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Runs `clean-temp-files` jobs against the shared temp directory.
pub struct CleanupProcessor {
    temp_dir: PathBuf,
    max_age: Duration,
}

impl CleanupProcessor {
    pub fn new(temp_dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            max_age,
        }
    }
}

#[async_trait]
impl JobProcessor for CleanupProcessor {
    fn queue(&self) -> QueueName {
        QueueName::Cleanup
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<(), JobFailure> {
        if !matches!(envelope.job, QueueJob::CleanTempFiles(_)) {
            return Err(unexpected_job("clean-temp-files", envelope.job_type()));
        }

        let report = sweep_dir(&self.temp_dir, self.max_age)
            .await
            .map_err(|e| WorkerError::from(e).to_failure())?;

        info!(
            job_id = %envelope.id,
            scanned = report.scanned,
            deleted = report.deleted,
            failed = report.failed,
            "Cleanup sweep finished"
        );
        Ok(())
    }
}
