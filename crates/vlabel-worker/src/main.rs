//! Video preprocessing worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vlabel_index::IndexRegistry;
use vlabel_media::{check_ffmpeg, check_ffprobe};
use vlabel_ml_client::MlClient;
use vlabel_models::PreprocessStatus;
use vlabel_storage::{S3Config, S3Store};
use vlabel_store::MemoryStore;
use vlabel_worker::{
    FfmpegFrameSource, PipelineContext, PipelineService, VideoLocks, WorkerConfig, WorkerResult,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vlabel=info".parse().unwrap())
        .add_directive("aws_config=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

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

    info!("Starting vlabel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Err(e) = check_ffmpeg() {
        error!("FFmpeg check failed: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = check_ffprobe() {
        error!("FFprobe check failed: {}", e);
        std::process::exit(1);
    }

    let s3_config = match S3Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load media store config: {}", e);
            std::process::exit(1);
        }
    };
    let media = match S3Store::new(s3_config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create media store client: {}", e);
            std::process::exit(1);
        }
    };

    let ml = match MlClient::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to create ML client: {}", e);
            std::process::exit(1);
        }
    };
    match ml.health_check().await {
        Ok(true) => info!("ML service is healthy"),
        _ => warn!("ML service is not reachable yet, embedding and detection will retry"),
    }

    // Relational persistence is provided by the deployment; the in-memory
    // store backs single-node runs.
    let store = Arc::new(MemoryStore::new());

    let ctx = Arc::new(PipelineContext {
        store,
        media,
        embedder: ml.clone(),
        detector: ml,
        frame_source: Arc::new(FfmpegFrameSource),
        registry: Arc::new(IndexRegistry::new()),
        locks: VideoLocks::new(),
        config,
    });
    let service = PipelineService::new(ctx);

    info!("Worker ready");

    // The datastore is the intake: uploads land there as pending videos
    // and the sweep picks them up. In-flight videos are no-ops under
    // their per-video lock.
    let mut sweep = tokio::time::interval(service.context().config.pending_sweep_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sweep.tick() => {
                if let Err(e) = spawn_pending(&service).await {
                    warn!("Pending-video sweep failed: {}", e);
                }
            }
        }
    }

    info!("Received shutdown signal");
    info!("Worker shutdown complete");
}

/// Start preprocessing for every video still waiting in the datastore.
async fn spawn_pending(service: &PipelineService) -> WorkerResult<()> {
    let ctx = service.context();
    for project in ctx.store.list_projects().await? {
        for video in ctx.store.list_videos_by_project(&project.id).await? {
            if video.preprocessing_status == PreprocessStatus::Pending {
                info!(video_id = %video.id, "Picked up pending video");
                service.spawn_preprocess(video.id);
            }
        }
    }
    Ok(())
}
