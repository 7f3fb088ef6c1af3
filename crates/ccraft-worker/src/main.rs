//! Caption pipeline worker binary.
//!
//! Runs one stage per process: `ccraft-worker <transcription|burn-in|cleanup>`,
//! or the stage named by `WORKER_STAGE`.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ccraft_media::{FfmpegToolkit, MediaToolkit};
use ccraft_queue::{
    CacheConfig, ConnectionPool, ConsumerConfig, JobCache, JobProcessor, PoolConfig, QueueRegistry,
    RegistryConfig,
};
use ccraft_storage::{ObjectStorage, R2Storage};
use ccraft_store::{PostgrestStore, RecordStore};
use ccraft_worker::{
    BurnInProcessor, CleanupProcessor, JobExecutor, Stage, TranscriptionProcessor, VideoLifecycle,
    WhisperClient, WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ccraft=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    let stage = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<Stage>()?,
        None => config
            .stage
            .context("no stage given; pass transcription, burn-in or cleanup, or set WORKER_STAGE")?,
    };
    info!(stage = %stage, "Starting ccraft-worker");
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .install()
            .context("failed to start Prometheus exporter")?;
        info!(port, "Prometheus exporter listening");
    }

    let pool = Arc::new(ConnectionPool::redis(PoolConfig::from_env()));
    let registry = Arc::new(QueueRegistry::new(pool, RegistryConfig::from_env()));
    let cache = JobCache::new(Arc::clone(&registry), CacheConfig::from_env());

    let processor = build_processor(stage, &config, &cache)?;

    let executor = Arc::new(JobExecutor::new(
        config,
        ConsumerConfig::from_env(),
        registry,
        cache,
    ));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    executor.run(processor).await?;
    Ok(())
}

/// Clients shared by the video stages.
struct VideoStageDeps {
    store: Arc<dyn RecordStore>,
    storage: Arc<dyn ObjectStorage>,
    media: Arc<dyn MediaToolkit>,
    lifecycle: Arc<VideoLifecycle>,
}

impl VideoStageDeps {
    fn from_env(cache: &JobCache) -> anyhow::Result<Self> {
        let store: Arc<dyn RecordStore> = Arc::new(PostgrestStore::from_env().context("record store")?);
        let storage = Arc::new(R2Storage::from_env().context("object storage")?);
        let media = Arc::new(FfmpegToolkit::new().context("ffmpeg")?);
        let lifecycle = Arc::new(VideoLifecycle::new(Arc::clone(&store), Arc::new(cache.clone())));
        Ok(Self {
            store,
            storage,
            media,
            lifecycle,
        })
    }
}

fn build_processor(
    stage: Stage,
    config: &WorkerConfig,
    cache: &JobCache,
) -> anyhow::Result<Arc<dyn JobProcessor>> {
    let processor: Arc<dyn JobProcessor> = match stage {
        Stage::Cleanup => Arc::new(CleanupProcessor::new(
            config.temp_dir.clone(),
            config.cleanup_max_age,
        )),
        Stage::Transcription => {
            let deps = VideoStageDeps::from_env(cache)?;
            let speech = Arc::new(WhisperClient::from_env().context("speech-to-text")?);
            Arc::new(TranscriptionProcessor::new(
                deps.lifecycle,
                deps.store,
                deps.storage,
                deps.media,
                speech,
                config.temp_dir.clone(),
            ))
        }
        Stage::BurnIn => {
            let deps = VideoStageDeps::from_env(cache)?;
            Arc::new(BurnInProcessor::new(
                deps.lifecycle,
                deps.store,
                deps.storage,
                deps.media,
                config.temp_dir.clone(),
            ))
        }
    };
    Ok(processor)
}
