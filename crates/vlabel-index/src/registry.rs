//! Registry of in-memory similarity indexes, one per video.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use vlabel_models::VideoId;

use crate::error::{IndexError, IndexResult};
use crate::index::SimilarityIndex;

/// Holds the live index for each preprocessed video. Inserts replace the
/// previous index atomically, so concurrent readers see either the old or
/// the new index, never a partial one.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    indexes: RwLock<HashMap<VideoId, Arc<SimilarityIndex>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the index for a video. Fails with `NotReady` until the
    /// video's preprocessing has published one.
    pub async fn get(&self, video_id: &VideoId) -> IndexResult<Arc<SimilarityIndex>> {
        self.indexes
            .read()
            .await
            .get(video_id)
            .cloned()
            .ok_or_else(|| IndexError::NotReady(video_id.to_string()))
    }

    /// Publish (or replace) the index for a video.
    pub async fn insert(&self, video_id: VideoId, index: SimilarityIndex) {
        let frames = index.len();
        self.indexes
            .write()
            .await
            .insert(video_id.clone(), Arc::new(index));
        debug!(video_id = %video_id, frames, "Published similarity index");
    }

    /// Drop the index for a video, e.g. when the video is deleted or is
    /// being reprocessed.
    pub async fn remove(&self, video_id: &VideoId) {
        self.indexes.write().await.remove(video_id);
    }

    pub async fn contains(&self, video_id: &VideoId) -> bool {
        self.indexes.read().await.contains_key(video_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Metric;

    fn sample_index() -> SimilarityIndex {
        SimilarityIndex::build(&[vec![0.0, 0.0], vec![1.0, 1.0]], Metric::Euclidean).unwrap()
    }

    #[tokio::test]
    async fn test_get_before_insert_is_not_ready() {
        let registry = IndexRegistry::new();
        let video_id = VideoId::new();
        let err = registry.get(&video_id).await.unwrap_err();
        assert!(matches!(err, IndexError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_insert_replaces_previous_index() {
        let registry = IndexRegistry::new();
        let video_id = VideoId::new();

        registry.insert(video_id.clone(), sample_index()).await;
        assert_eq!(registry.get(&video_id).await.unwrap().len(), 2);

        let bigger = SimilarityIndex::build(
            &[vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
            Metric::Euclidean,
        )
        .unwrap();
        registry.insert(video_id.clone(), bigger).await;
        assert_eq!(registry.get(&video_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_remove_makes_index_not_ready_again() {
        let registry = IndexRegistry::new();
        let video_id = VideoId::new();

        registry.insert(video_id.clone(), sample_index()).await;
        registry.remove(&video_id).await;
        assert!(!registry.contains(&video_id).await);
        assert!(registry.get(&video_id).await.is_err());
    }
}
