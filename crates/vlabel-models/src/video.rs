//! Video metadata and preprocessing lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{ProjectId, VideoId};

/// Preprocessing pipeline status of a video.
///
/// Transitions are monotonic: `Pending → Extracting → Embedding → Indexing
/// → Inferring → Success`, with `Failed` reachable from any non-terminal
/// stage. A terminal video only re-enters the pipeline through an explicit
/// re-run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessStatus {
    /// Uploaded, pipeline not started yet
    #[default]
    Pending,
    /// Decoding frames from the source video
    Extracting,
    /// Computing per-frame feature vectors
    Embedding,
    /// Building the frame similarity index
    Indexing,
    /// Seeding bounding boxes with detection inference
    Inferring,
    /// Preprocessing completed successfully
    Success,
    /// Preprocessing failed (or was cancelled)
    Failed,
}

impl PreprocessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreprocessStatus::Pending => "pending",
            PreprocessStatus::Extracting => "extracting",
            PreprocessStatus::Embedding => "embedding",
            PreprocessStatus::Indexing => "indexing",
            PreprocessStatus::Inferring => "inferring",
            PreprocessStatus::Success => "success",
            PreprocessStatus::Failed => "failed",
        }
    }

    /// Whether the pipeline has stopped for this video.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PreprocessStatus::Success | PreprocessStatus::Failed)
    }

    /// Ordinal position in the pipeline, used to enforce forward-only moves.
    fn stage_ordinal(&self) -> u8 {
        match self {
            PreprocessStatus::Pending => 0,
            PreprocessStatus::Extracting => 1,
            PreprocessStatus::Embedding => 2,
            PreprocessStatus::Indexing => 3,
            PreprocessStatus::Inferring => 4,
            PreprocessStatus::Success => 5,
            PreprocessStatus::Failed => 6,
        }
    }

    /// Whether moving to `next` is a legal forward transition.
    ///
    /// `Failed` is reachable from any non-terminal stage; everything else
    /// must advance strictly through the pipeline order.
    pub fn can_transition_to(&self, next: PreprocessStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == PreprocessStatus::Failed {
            return true;
        }
        next.stage_ordinal() > self.stage_ordinal()
    }
}

impl fmt::Display for PreprocessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An uploaded video and its preprocessing artifacts.
///
/// Mutated only by the preprocessing pipeline (status and artifact URLs);
/// never edited directly by users.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    /// Unique video ID
    pub id: VideoId,

    /// Owning project
    pub project_id: ProjectId,

    /// Video name (unique within the project)
    pub name: String,

    /// Media store key of the raw video bytes
    pub video_url: String,

    /// Media store key of the per-frame feature artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_features_url: Option<String>,

    /// Media store key of the frame similarity artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_similarity_url: Option<String>,

    /// Raw video size in bytes
    pub size_in_bytes: u64,

    /// Preprocessing pipeline status
    #[serde(default)]
    pub preprocessing_status: PreprocessStatus,

    /// Whether a background retrain/re-infer pass is currently running
    #[serde(default)]
    pub reinferring: bool,

    /// Error message (if preprocessing failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Upload timestamp
    pub date_uploaded: DateTime<Utc>,
}

impl Video {
    /// Create a new video record in the `Pending` state.
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        video_url: impl Into<String>,
        size_in_bytes: u64,
    ) -> Self {
        Self {
            id: VideoId::new(),
            project_id,
            name: name.into(),
            video_url: video_url.into(),
            frame_features_url: None,
            frame_similarity_url: None,
            size_in_bytes,
            preprocessing_status: PreprocessStatus::Pending,
            reinferring: false,
            error_message: None,
            date_uploaded: Utc::now(),
        }
    }

    /// Mark preprocessing as failed with an error message.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.preprocessing_status = PreprocessStatus::Failed;
        self.error_message = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use PreprocessStatus::*;

        assert!(Pending.can_transition_to(Extracting));
        assert!(Extracting.can_transition_to(Embedding));
        assert!(Embedding.can_transition_to(Indexing));
        assert!(Indexing.can_transition_to(Inferring));
        assert!(Inferring.can_transition_to(Success));

        // Backward moves are rejected
        assert!(!Embedding.can_transition_to(Extracting));
        assert!(!Inferring.can_transition_to(Pending));

        // Failure is reachable from any non-terminal stage
        assert!(Pending.can_transition_to(Failed));
        assert!(Inferring.can_transition_to(Failed));

        // Terminal states stay terminal
        assert!(!Success.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Extracting));
    }

    #[test]
    fn test_new_video_is_pending() {
        let video = Video::new(ProjectId::new(), "clip.mp4", "p1/v1/raw.mp4", 1024);
        assert_eq!(video.preprocessing_status, PreprocessStatus::Pending);
        assert!(video.frame_features_url.is_none());
        assert!(video.frame_similarity_url.is_none());
        assert!(!video.reinferring);
    }
}
