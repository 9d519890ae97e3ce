//! Per-video execution locks.
//!
//! The pipeline and the retrain loop both mutate a video's frames and
//! boxes; a per-video mutex keeps those passes serialized while videos
//! stay independent of each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use vlabel_models::VideoId;

/// Registry of per-video mutexes.
#[derive(Debug, Default, Clone)]
pub struct VideoLocks {
    inner: Arc<Mutex<HashMap<VideoId, Arc<Mutex<()>>>>>,
}

impl VideoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, video_id: &VideoId) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().await;
        map.entry(video_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for a video, waiting if another pass holds it.
    pub async fn acquire(&self, video_id: &VideoId) -> OwnedMutexGuard<()> {
        self.lock_for(video_id).await.lock_owned().await
    }

    /// Acquire the lock only if it is free. `None` means another pass is
    /// already running for this video.
    pub async fn try_acquire(&self, video_id: &VideoId) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(video_id).await.try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_is_blocked_while_held() {
        let locks = VideoLocks::new();
        let video_id = VideoId::new();

        let guard = locks.try_acquire(&video_id).await;
        assert!(guard.is_some());
        assert!(locks.try_acquire(&video_id).await.is_none());

        drop(guard);
        assert!(locks.try_acquire(&video_id).await.is_some());
    }

    #[tokio::test]
    async fn test_different_videos_are_independent() {
        let locks = VideoLocks::new();
        let a = VideoId::new();
        let b = VideoId::new();

        let _guard_a = locks.try_acquire(&a).await.unwrap();
        assert!(locks.try_acquire(&b).await.is_some());
    }
}
