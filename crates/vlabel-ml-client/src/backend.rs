//! Backend capability traits.

use async_trait::async_trait;

use vlabel_models::BoxCandidate;

use crate::error::MlResult;
use crate::types::Correction;

/// Computes a fixed-length feature vector capturing the visual content of
/// a frame image.
#[async_trait]
pub trait FeatureEmbedder: Send + Sync {
    /// Dimensionality of the vectors this backend produces.
    fn dimension(&self) -> usize;

    /// Embed one encoded image. The returned vector has length
    /// `dimension()`.
    async fn embed(&self, image: &[u8]) -> MlResult<Vec<f32>>;
}

/// Runs object detection over a frame image.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detect objects in one encoded image. An empty result is valid.
    async fn detect(&self, image: &[u8]) -> MlResult<Vec<BoxCandidate>>;

    /// Feed a batch of human-confirmed boxes to the backend before
    /// re-inference. Backends without an online-adaptation path may treat
    /// this as a no-op.
    async fn fine_tune(&self, corrections: &[Correction]) -> MlResult<()>;
}
