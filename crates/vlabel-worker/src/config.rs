//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum videos preprocessed concurrently
    pub max_concurrent_videos: usize,
    /// Work directory for temporary files (raw downloads, frame images)
    pub work_dir: String,
    /// Minimum detector confidence for a prediction box to be persisted
    pub min_confidence: f32,
    /// Timeout for the frame extraction stage of one video
    pub extraction_timeout: Duration,
    /// Default number of frames returned by a review batch
    pub review_batch_size: usize,
    /// How often the binary sweeps the datastore for pending videos
    pub pending_sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_videos: 2,
            work_dir: "/tmp/vlabel".to_string(),
            min_confidence: 0.5,
            extraction_timeout: Duration::from_secs(1800),
            review_batch_size: 10,
            pending_sweep_interval: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_videos: std::env::var("VLABEL_MAX_CONCURRENT_VIDEOS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            work_dir: std::env::var("VLABEL_WORK_DIR")
                .unwrap_or_else(|_| "/tmp/vlabel".to_string()),
            min_confidence: std::env::var("VLABEL_MIN_CONFIDENCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.5),
            extraction_timeout: Duration::from_secs(
                std::env::var("VLABEL_EXTRACTION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            review_batch_size: std::env::var("VLABEL_REVIEW_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            pending_sweep_interval: Duration::from_secs(
                std::env::var("VLABEL_PENDING_SWEEP_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_videos, 2);
        assert!((config.min_confidence - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.review_batch_size, 10);
    }
}
