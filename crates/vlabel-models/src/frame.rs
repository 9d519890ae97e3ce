//! Frame model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{FrameId, ProjectId, VideoId};

/// One extracted still image from a video.
///
/// `sequence_index` is strictly increasing within a video, gap-free from 0,
/// and doubles as the row key into the video's similarity index.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Frame {
    /// Unique frame ID
    pub id: FrameId,

    /// Owning project
    pub project_id: ProjectId,

    /// Owning video
    pub video_id: VideoId,

    /// Position of this frame in the sampled sequence (0-based)
    pub sequence_index: u32,

    /// Media store key of the frame image
    pub frame_url: String,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Whether a human has signed off on this frame's boxes.
    /// Flips false→true monotonically; only an explicit user action resets it.
    #[serde(default)]
    pub human_reviewed: bool,
}

impl Frame {
    /// Create a new unreviewed frame.
    pub fn new(
        project_id: ProjectId,
        video_id: VideoId,
        sequence_index: u32,
        frame_url: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id: FrameId::new(),
            project_id,
            video_id,
            sequence_index,
            frame_url: frame_url.into(),
            width,
            height,
            human_reviewed: false,
        }
    }
}
