//! Shared fixtures for the worker integration tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};

use vlabel_index::IndexRegistry;
use vlabel_media::{ExtractedFrame, MediaError, MediaResult};
use vlabel_ml_client::{Correction, FeatureEmbedder, MlError, MlResult, ObjectDetector};
use vlabel_models::BoxCandidate;
use vlabel_storage::MemoryMediaStore;
use vlabel_store::MemoryStore;
use vlabel_worker::{FrameSource, PipelineContext, PipelineService, VideoLocks, WorkerConfig};

/// Frame source that fabricates `count` tiny images instead of decoding.
/// Each image's first byte is its sequence index, so stub embeddings and
/// detections can vary per frame.
pub struct StubFrameSource {
    pub count: u32,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
impl FrameSource for StubFrameSource {
    async fn extract(
        &self,
        _video_path: &Path,
        _rate: f64,
        out_dir: &Path,
    ) -> MediaResult<Vec<ExtractedFrame>> {
        tokio::fs::create_dir_all(out_dir).await?;
        let mut frames = Vec::with_capacity(self.count as usize);
        for i in 0..self.count {
            let path = out_dir.join(format!("{:06}.jpg", i));
            tokio::fs::write(&path, vec![i as u8; 16]).await?;
            frames.push(ExtractedFrame {
                sequence_index: i,
                path,
                width: self.width,
                height: self.height,
            });
        }
        Ok(frames)
    }
}

/// Frame source that rejects every input as undecodable.
pub struct FailingFrameSource;

#[async_trait]
impl FrameSource for FailingFrameSource {
    async fn extract(
        &self,
        _video_path: &Path,
        _rate: f64,
        _out_dir: &Path,
    ) -> MediaResult<Vec<ExtractedFrame>> {
        Err(MediaError::decode("not a video"))
    }
}

/// Embedder returning a constant vector keyed by the image's first byte.
pub struct StubEmbedder {
    pub dim: usize,
    /// First-byte values whose embedding call fails
    pub fail_on: HashSet<u8>,
}

impl StubEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            fail_on: HashSet::new(),
        }
    }
}

#[async_trait]
impl FeatureEmbedder for StubEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, image: &[u8]) -> MlResult<Vec<f32>> {
        let key = image.first().copied().unwrap_or(0);
        if self.fail_on.contains(&key) {
            return Err(MlError::backend(format!("embed failed for frame {}", key)));
        }
        Ok(vec![key as f32 + 1.0; self.dim])
    }
}

/// Detector returning a fixed candidate list for every frame, with call
/// accounting for the retrain tests.
pub struct StubDetector {
    pub candidates: Vec<BoxCandidate>,
    pub fail: bool,
    pub detect_calls: AtomicUsize,
    pub fine_tune_batches: Mutex<Vec<usize>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl StubDetector {
    pub fn new(candidates: Vec<BoxCandidate>) -> Self {
        Self {
            candidates,
            fail: false,
            detect_calls: AtomicUsize::new(0),
            fine_tune_batches: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    pub fn detect_count(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent `detect` call wait on the returned semaphore.
    /// Tests add permits to let detections through one by one, or a large
    /// batch to drain the pass.
    pub async fn hold_detections(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().await = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ObjectDetector for StubDetector {
    async fn detect(&self, _image: &[u8]) -> MlResult<Vec<BoxCandidate>> {
        let gate = self.gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MlError::backend("detector offline"));
        }
        Ok(self.candidates.clone())
    }

    async fn fine_tune(&self, corrections: &[Correction]) -> MlResult<()> {
        self.fine_tune_batches.lock().await.push(corrections.len());
        Ok(())
    }
}

/// Everything a test needs, with the work dir kept alive for the duration.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub media: Arc<MemoryMediaStore>,
    pub registry: Arc<IndexRegistry>,
    pub ctx: Arc<PipelineContext>,
    pub service: PipelineService,
    _work_dir: tempfile::TempDir,
}

pub fn harness(
    frame_source: Arc<dyn FrameSource>,
    embedder: Arc<StubEmbedder>,
    detector: Arc<StubDetector>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMediaStore::new());
    let registry = Arc::new(IndexRegistry::new());
    let work_dir = tempfile::tempdir().expect("tempdir");

    let config = WorkerConfig {
        work_dir: work_dir.path().to_string_lossy().into_owned(),
        ..WorkerConfig::default()
    };

    let ctx = Arc::new(PipelineContext {
        store: store.clone(),
        media: media.clone(),
        embedder,
        detector,
        frame_source,
        registry: registry.clone(),
        locks: VideoLocks::new(),
        config,
    });

    Harness {
        store,
        media,
        registry,
        ctx: ctx.clone(),
        service: PipelineService::new(ctx),
        _work_dir: work_dir,
    }
}

/// A valid high-confidence candidate.
pub fn candidate(label: &str, confidence: f32) -> BoxCandidate {
    BoxCandidate {
        label_name: label.to_string(),
        geometry: vlabel_models::BoxGeometry::from_corners(10.0, 20.0, 60.0, 80.0),
        confidence,
    }
}
