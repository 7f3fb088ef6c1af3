//! Worker configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ccraft_queue::QueueName;

use crate::error::WorkerError;

/// Pipeline stage a worker process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcription,
    BurnIn,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcription => "transcription",
            Stage::BurnIn => "burn-in",
            Stage::Cleanup => "cleanup",
        }
    }

    pub fn queue(&self) -> QueueName {
        match self {
            Stage::Transcription => QueueName::Transcription,
            Stage::BurnIn => QueueName::BurnIn,
            Stage::Cleanup => QueueName::Cleanup,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transcription" | "transcribe" => Ok(Stage::Transcription),
            "burn-in" | "burnin" | "burn_in" => Ok(Stage::BurnIn),
            "cleanup" => Ok(Stage::Cleanup),
            other => Err(WorkerError::config_error(format!(
                "unknown stage '{}' (expected transcription, burn-in or cleanup)",
                other
            ))),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stage from `WORKER_STAGE`; the command line wins when both are set
    pub stage: Option<Stage>,
    /// Directory holding every stage's temporary files
    pub temp_dir: PathBuf,
    /// Temp files older than this are swept
    pub cleanup_max_age: Duration,
    /// How often the cleanup job is scheduled
    pub cleanup_interval: Duration,
    /// How often optimization stats are logged
    pub stats_interval: Duration,
    /// Prometheus exporter port
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stage: None,
            temp_dir: std::env::temp_dir().join("ccraft"),
            cleanup_max_age: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(300),
            stats_interval: Duration::from_secs(300),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, WorkerError> {
        let defaults = Self::default();
        let stage = match std::env::var("WORKER_STAGE") {
            Ok(s) if !s.trim().is_empty() => Some(s.parse()?),
            _ => None,
        };

        Ok(Self {
            stage,
            temp_dir: std::env::var("WORKER_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            cleanup_max_age: Duration::from_secs(
                std::env::var("CLEANUP_MAX_AGE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            cleanup_interval: Duration::from_secs(
                std::env::var("CLEANUP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            stats_interval: Duration::from_secs(
                std::env::var("STATS_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        })
    }
}
