//! Video preprocessing pipeline.
//!
//! Drives a video from upload to annotation-ready: frame extraction,
//! per-frame feature embedding, similarity index construction and seed
//! object detection. Each stage records its progress on the video row, so
//! a re-run resumes at the first stage whose outputs are missing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use vlabel_index::{FeatureArtifact, IndexRegistry, Metric, SimilarityArtifact, SimilarityIndex};
use vlabel_media::{extract_frames, ExtractedFrame, MediaResult};
use vlabel_ml_client::{FeatureEmbedder, ObjectDetector};
use vlabel_models::{Frame, PreprocessStatus, Project, ProjectId, Video, VideoId};
use vlabel_storage::{
    decode_artifact, encode_artifact, features_key, frame_key, raw_video_key, similarity_key,
    MediaStore, CONTENT_TYPE_GZIP,
};
use vlabel_store::Datastore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::inference::seed_inference;
use crate::locks::VideoLocks;

/// Produces the ordered frame sequence for a local video file.
///
/// The production implementation shells out to FFmpeg; tests substitute a
/// synthetic source so the pipeline runs without a decoder installed.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn extract(
        &self,
        video_path: &Path,
        rate: f64,
        out_dir: &Path,
    ) -> MediaResult<Vec<ExtractedFrame>>;
}

/// FFmpeg-backed frame source.
#[derive(Debug, Default)]
pub struct FfmpegFrameSource;

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn extract(
        &self,
        video_path: &Path,
        rate: f64,
        out_dir: &Path,
    ) -> MediaResult<Vec<ExtractedFrame>> {
        extract_frames(video_path, rate, out_dir, None).await
    }
}

/// Shared handles the pipeline operates over.
pub struct PipelineContext {
    pub store: Arc<dyn Datastore>,
    pub media: Arc<dyn MediaStore>,
    pub embedder: Arc<dyn FeatureEmbedder>,
    pub detector: Arc<dyn ObjectDetector>,
    pub frame_source: Arc<dyn FrameSource>,
    pub registry: Arc<IndexRegistry>,
    pub locks: VideoLocks,
    pub config: WorkerConfig,
}

/// The preprocessing pipeline service.
pub struct PipelineService {
    ctx: Arc<PipelineContext>,
    semaphore: Arc<Semaphore>,
}

impl PipelineService {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        let semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_videos));
        Self { ctx, semaphore }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Store a raw video and register it in the `Pending` state. The
    /// caller kicks off preprocessing separately.
    pub async fn upload_video(
        &self,
        project_id: &ProjectId,
        name: &str,
        data: Vec<u8>,
    ) -> WorkerResult<Video> {
        let project = self.ctx.store.get_project(project_id).await?;

        let mut video = Video::new(project.id.clone(), name, String::new(), data.len() as u64);
        let key = raw_video_key(&project.id, &video.id);
        video.video_url = key.clone();

        self.ctx
            .media
            .put(&key, data, "application/octet-stream")
            .await?;
        let video = self.ctx.store.create_video(video).await?;

        info!(video_id = %video.id, name, "Video uploaded");
        Ok(video)
    }

    /// Upload a video and start preprocessing in the background. Returns
    /// the `Pending` video immediately; callers poll its status.
    pub async fn submit_video(
        &self,
        project_id: &ProjectId,
        name: &str,
        data: Vec<u8>,
    ) -> WorkerResult<Video> {
        let video = self.upload_video(project_id, name, data).await?;
        self.spawn_preprocess(video.id.clone());
        Ok(video)
    }

    /// Run preprocessing for a video in the background.
    pub fn spawn_preprocess(&self, video_id: VideoId) {
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if let Err(e) = preprocess_video(&ctx, &video_id).await {
                error!(video_id = %video_id, "Preprocessing task failed: {}", e);
            }
        });
    }

    /// Run preprocessing for a video and wait for it to finish.
    pub async fn preprocess_video(&self, video_id: &VideoId) -> WorkerResult<()> {
        preprocess_video(&self.ctx, video_id).await
    }

    /// Re-run preprocessing for a terminal video. Resumes at the first
    /// stage whose outputs are missing; a failed extraction starts over,
    /// a failed inference reuses the existing frames and index.
    pub async fn rerun_video(&self, video_id: &VideoId) -> WorkerResult<()> {
        self.ctx
            .store
            .reset_video_for_rerun(video_id, PreprocessStatus::Pending)
            .await?;
        preprocess_video(&self.ctx, video_id).await
    }

    /// Request cancellation of a running (or pending) preprocessing pass.
    /// The pipeline observes the terminal status between stages and stops.
    pub async fn cancel_video(&self, video_id: &VideoId) -> WorkerResult<()> {
        self.ctx
            .store
            .mark_video_failed(video_id, "cancelled by user")
            .await?;
        info!(video_id = %video_id, "Cancellation requested");
        Ok(())
    }

    /// Delete a video: its rows, its stored objects and its live index.
    pub async fn delete_video(&self, video_id: &VideoId) -> WorkerResult<()> {
        // Serialize against any running pipeline pass.
        let _guard = self.ctx.locks.acquire(video_id).await;

        let video = self.ctx.store.get_video(video_id).await?;
        let prefix = format!("{}/{}/", video.project_id, video.id);

        self.ctx.registry.remove(video_id).await;
        self.ctx.store.delete_video(video_id).await?;
        let removed = self.ctx.media.delete_prefix(&prefix).await?;

        info!(video_id = %video_id, objects = removed, "Video deleted");
        Ok(())
    }

    /// Delete a project: cascading row removal plus every stored object
    /// under the project's prefix.
    pub async fn delete_project(&self, project_id: &ProjectId) -> WorkerResult<()> {
        let videos = self.ctx.store.list_videos_by_project(project_id).await?;
        for video in &videos {
            // Wait out any running pipeline pass before dropping the index.
            let _guard = self.ctx.locks.acquire(&video.id).await;
            self.ctx.registry.remove(&video.id).await;
        }

        self.ctx.store.delete_project(project_id).await?;
        let removed = self
            .ctx
            .media
            .delete_prefix(&format!("{}/", project_id))
            .await?;

        info!(
            project_id = %project_id,
            videos = videos.len(),
            objects = removed,
            "Project deleted"
        );
        Ok(())
    }
}

/// Run the pipeline for one video under its per-video lock. A second call
/// while a pass is in flight is a no-op.
pub async fn preprocess_video(ctx: &PipelineContext, video_id: &VideoId) -> WorkerResult<()> {
    let Some(_guard) = ctx.locks.try_acquire(video_id).await else {
        info!(video_id = %video_id, "Preprocessing already in flight, ignoring duplicate request");
        return Ok(());
    };

    let video = ctx.store.get_video(video_id).await?;
    if video.preprocessing_status.is_terminal() {
        info!(
            video_id = %video_id,
            status = %video.preprocessing_status,
            "Video is terminal, not starting pipeline"
        );
        return Ok(());
    }

    match run_stages(ctx, video).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(video_id = %video_id, "Preprocessing failed: {}", e);
            if let Err(mark_err) = ctx.store.mark_video_failed(video_id, &e.to_string()).await {
                error!(video_id = %video_id, "Failed to record failure: {}", mark_err);
            }
            Err(e)
        }
    }
}

async fn run_stages(ctx: &PipelineContext, mut video: Video) -> WorkerResult<()> {
    let video_id = video.id.clone();
    let project = ctx.store.get_project(&video.project_id).await?;

    // Stage 1: extraction, skipped when a frame set already exists.
    let mut frames = ctx.store.get_frames_by_video(&video_id).await?;
    let mut rebuilt = false;
    if frames.is_empty() {
        video = ctx
            .store
            .advance_video_status(&video_id, PreprocessStatus::Extracting)
            .await?;
        let Some(extracted) = run_extraction(ctx, &project, &video).await? else {
            return Ok(());
        };
        frames = extracted;
        rebuilt = true;
    }
    if cancelled(ctx, &video_id).await? {
        return Ok(());
    }

    // Stage 2: embedding.
    let features = match video.frame_features_url.clone().filter(|_| !rebuilt) {
        Some(key) => decode_artifact(&ctx.media.get(&key).await?)?,
        None => {
            video = ctx
                .store
                .advance_video_status(&video_id, PreprocessStatus::Embedding)
                .await?;
            let Some(artifact) = run_embedding(ctx, &frames).await? else {
                return Ok(());
            };

            let key = features_key(&project.id, &video_id);
            let bytes = encode_artifact(&artifact)?;
            ctx.media.put(&key, bytes, CONTENT_TYPE_GZIP).await?;
            video = ctx
                .store
                .set_video_artifacts(&video_id, Some(key), None)
                .await?;
            rebuilt = true;
            artifact
        }
    };
    if cancelled(ctx, &video_id).await? {
        return Ok(());
    }

    // Stage 3: similarity index. Published with an atomic swap, so review
    // queries keep working against the previous index until the new one
    // is complete.
    match video.frame_similarity_url.clone().filter(|_| !rebuilt) {
        Some(key) => {
            // A persisted index survives a restart; reload it instead of
            // recomputing the pairwise matrix.
            if !ctx.registry.contains(&video_id).await {
                let artifact: SimilarityArtifact = decode_artifact(&ctx.media.get(&key).await?)?;
                ctx.registry
                    .insert(video_id.clone(), artifact.into_index()?)
                    .await;
                info!(video_id = %video_id, "Reloaded persisted similarity index");
            }
        }
        None => {
            ctx.store
                .advance_video_status(&video_id, PreprocessStatus::Indexing)
                .await?;
            let index = SimilarityIndex::build(&features.vectors, Metric::Euclidean)?;

            let key = similarity_key(&project.id, &video_id);
            let bytes = encode_artifact(&SimilarityArtifact::from_index(&index))?;
            ctx.media.put(&key, bytes, CONTENT_TYPE_GZIP).await?;
            ctx.store
                .set_video_artifacts(&video_id, None, Some(key))
                .await?;

            ctx.registry.insert(video_id.clone(), index).await;
        }
    }
    if cancelled(ctx, &video_id).await? {
        return Ok(());
    }

    // Stage 4: seed inference.
    ctx.store
        .advance_video_status(&video_id, PreprocessStatus::Inferring)
        .await?;
    seed_inference(
        ctx.store.as_ref(),
        ctx.media.as_ref(),
        ctx.detector.as_ref(),
        ctx.config.min_confidence,
        &frames,
    )
    .await?;

    ctx.store
        .advance_video_status(&video_id, PreprocessStatus::Success)
        .await?;
    info!(video_id = %video_id, frames = frames.len(), "Preprocessing complete");
    Ok(())
}

/// Whether a cancellation (external failure mark) has landed since the
/// last stage boundary.
async fn cancelled(ctx: &PipelineContext, video_id: &VideoId) -> WorkerResult<bool> {
    let video = ctx.store.get_video(video_id).await?;
    if video.preprocessing_status == PreprocessStatus::Failed {
        warn!(video_id = %video_id, "Pipeline stopped: video was marked failed");
        return Ok(true);
    }
    Ok(false)
}

/// Decode the raw video into frames, upload them and insert the frame
/// rows. Replaces any partial frame set from an interrupted pass.
/// Returns `None` when a cancellation landed mid-upload.
async fn run_extraction(
    ctx: &PipelineContext,
    project: &Project,
    video: &Video,
) -> WorkerResult<Option<Vec<Frame>>> {
    let work_dir = PathBuf::from(&ctx.config.work_dir).join(video.id.as_str());
    let frames_dir = work_dir.join("frames");
    tokio::fs::create_dir_all(&frames_dir).await?;

    let raw_path = work_dir.join("raw");
    let raw = ctx.media.get(&video.video_url).await?;
    tokio::fs::write(&raw_path, raw).await?;

    let extracted = tokio::time::timeout(
        ctx.config.extraction_timeout,
        ctx.frame_source
            .extract(&raw_path, project.frame_extraction_rate, &frames_dir),
    )
    .await
    .map_err(|_| WorkerError::pipeline_failed("frame extraction timed out"))??;

    // Interrupted passes may have left a partial frame set behind.
    let stale = ctx.store.delete_frames_by_video(&video.id).await?;
    if stale > 0 {
        warn!(video_id = %video.id, stale, "Replaced stale frames from an interrupted pass");
    }

    let mut frames = Vec::with_capacity(extracted.len());
    for item in &extracted {
        if cancelled(ctx, &video.id).await? {
            return Ok(None);
        }
        let key = frame_key(&project.id, &video.id, item.sequence_index);
        let bytes = tokio::fs::read(&item.path).await?;
        ctx.media.put(&key, bytes, "image/jpeg").await?;
        frames.push(Frame::new(
            project.id.clone(),
            video.id.clone(),
            item.sequence_index,
            key,
            item.width,
            item.height,
        ));
    }
    ctx.store.insert_frames(frames.clone()).await?;

    if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
        warn!(video_id = %video.id, "Failed to clean work dir: {}", e);
    }

    info!(video_id = %video.id, frames = frames.len(), "Extraction stage complete");
    Ok(Some(frames))
}

/// Embed every frame in sequence order. A frame whose embedding fails gets
/// an all-zero sentinel vector instead of failing the video; it simply
/// never ranks as similar to anything. Returns `None` on cancellation.
async fn run_embedding(
    ctx: &PipelineContext,
    frames: &[Frame],
) -> WorkerResult<Option<FeatureArtifact>> {
    let dim = ctx.embedder.dimension();
    let mut vectors = Vec::with_capacity(frames.len());

    for frame in frames {
        if cancelled(ctx, &frame.video_id).await? {
            return Ok(None);
        }
        let image = ctx.media.get(&frame.frame_url).await?;
        match ctx.embedder.embed(&image).await {
            Ok(vector) => vectors.push(vector),
            Err(e) => {
                warn!(
                    frame_id = %frame.id,
                    sequence_index = frame.sequence_index,
                    "Embedding failed, using zero vector: {}",
                    e
                );
                vectors.push(vec![0.0; dim]);
            }
        }
    }

    Ok(Some(FeatureArtifact::new(dim, vectors)))
}
