//! Deployment self-check: temp dir, ffmpeg, and required environment.

use std::path::Path;
use std::process::Command;

use ccraft_worker::{Stage, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;
    let stage = match std::env::args().nth(1) {
        Some(arg) => Some(arg.parse::<Stage>()?),
        None => config.stage,
    };

    println!(
        "worker-selfcheck: starting with temp_dir={} stage={}",
        config.temp_dir.display(),
        stage.map(|s| s.as_str()).unwrap_or("any")
    );
    ensure_temp_dir(&config.temp_dir).await?;
    ensure_env_present(&["REDIS_URL"])?;

    if stage != Some(Stage::Cleanup) {
        ensure_ffmpeg()?;
        ensure_env_present(&[
            "DATABASE_REST_URL",
            "DATABASE_SERVICE_KEY",
            "R2_ENDPOINT_URL",
            "R2_ACCESS_KEY_ID",
            "R2_SECRET_ACCESS_KEY",
            "R2_BUCKET_NAME",
        ])?;
    }
    if matches!(stage, None | Some(Stage::Transcription)) {
        ensure_env_present(&["OPENAI_API_KEY"])?;
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_temp_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}

fn ensure_ffmpeg() -> anyhow::Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffmpeg -version failed: {:?}", output.status));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
