//! Stage-local temporary files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Temporary files one job creates, removed when the job ends.
///
/// Call [`TempFiles::remove_all`] on every exit path. Anything still tracked
/// when the value is dropped (a panic in the stage body) is removed
/// synchronously.
#[derive(Debug)]
pub struct TempFiles {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl TempFiles {
    /// Track files under `dir`, creating it if needed.
    pub async fn create(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            paths: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a file name inside the temp dir.
    pub fn path(&mut self, name: impl AsRef<Path>) -> PathBuf {
        let path = self.dir.join(name);
        self.paths.push(path.clone());
        path
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Delete every tracked file. Missing files are fine; other errors are
    /// logged and skipped.
    pub async fn remove_all(&mut self) -> usize {
        let mut removed = 0;
        for path in self.paths.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Removed temp file {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
            }
        }
        removed
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}
