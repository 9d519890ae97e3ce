//! The `Datastore` capability trait.

use async_trait::async_trait;

use vlabel_models::{
    BoundingBox, BoxId, Frame, FrameId, Label, LabelId, PreprocessStatus, Project, ProjectId,
    Video, VideoId,
};

use crate::error::StoreResult;

/// Box count per label within a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCount {
    pub label_id: LabelId,
    pub name: String,
    pub box_count: u64,
}

/// Transactional CRUD surface over projects, videos, frames, boxes and
/// labels, with the ownership invariants enforced at this boundary:
/// every frame belongs to exactly one video of one project, every box to
/// exactly one frame, and a box's label must belong to the same project as
/// the box's frame.
///
/// Batch update methods are atomic: either every row in the batch is
/// persisted or none are.
#[async_trait]
pub trait Datastore: Send + Sync {
    // ---- projects ----

    /// Insert a project. Project names are unique.
    async fn create_project(&self, project: Project) -> StoreResult<Project>;

    async fn get_project(&self, id: &ProjectId) -> StoreResult<Project>;

    async fn get_project_by_name(&self, name: &str) -> StoreResult<Option<Project>>;

    async fn list_projects(&self) -> StoreResult<Vec<Project>>;

    /// Delete a project after cascading removal of its videos, frames,
    /// boxes and labels.
    async fn delete_project(&self, id: &ProjectId) -> StoreResult<()>;

    /// Fraction of the project's frames with `human_reviewed = true`,
    /// in [0, 100]. Zero frames counts as 0.
    async fn percent_frames_reviewed(&self, project_id: &ProjectId) -> StoreResult<f64>;

    // ---- videos ----

    /// Insert a video. Video names are unique within their project.
    async fn create_video(&self, video: Video) -> StoreResult<Video>;

    async fn get_video(&self, id: &VideoId) -> StoreResult<Video>;

    async fn list_videos_by_project(&self, project_id: &ProjectId) -> StoreResult<Vec<Video>>;

    /// Advance the preprocessing status. Fails with `InvalidTransition`
    /// unless the move is a legal forward transition.
    async fn advance_video_status(
        &self,
        id: &VideoId,
        next: PreprocessStatus,
    ) -> StoreResult<Video>;

    /// Mark the video failed with an error message. No-op when already
    /// terminal (the first failure wins).
    async fn mark_video_failed(&self, id: &VideoId, error: &str) -> StoreResult<Video>;

    /// Explicit re-run request: move a terminal video back to `status` and
    /// clear its error message. Only valid from `Success` or `Failed`.
    async fn reset_video_for_rerun(
        &self,
        id: &VideoId,
        status: PreprocessStatus,
    ) -> StoreResult<Video>;

    /// Set or clear the video's re-inference flag. The flag is raised when
    /// a retrain/re-infer pass starts and lowered when it finishes, so
    /// callers can poll the video row for completion.
    async fn set_video_reinferring(&self, id: &VideoId, reinferring: bool) -> StoreResult<Video>;

    /// Record artifact keys produced by the pipeline.
    async fn set_video_artifacts(
        &self,
        id: &VideoId,
        frame_features_url: Option<String>,
        frame_similarity_url: Option<String>,
    ) -> StoreResult<Video>;

    /// Delete a video and cascade its frames and boxes.
    async fn delete_video(&self, id: &VideoId) -> StoreResult<()>;

    // ---- frames ----

    /// Bulk-insert frames.
    async fn insert_frames(&self, frames: Vec<Frame>) -> StoreResult<()>;

    async fn get_frame(&self, id: &FrameId) -> StoreResult<Frame>;

    /// Frames of a video ordered by ascending sequence index.
    async fn get_frames_by_video(&self, video_id: &VideoId) -> StoreResult<Vec<Frame>>;

    async fn get_frames_by_project(&self, project_id: &ProjectId) -> StoreResult<Vec<Frame>>;

    /// Atomically update existing frames (all-or-nothing).
    async fn update_frames(&self, frames: Vec<Frame>) -> StoreResult<()>;

    /// Delete every frame of a video, cascading their boxes.
    /// Returns the number of frames removed.
    async fn delete_frames_by_video(&self, video_id: &VideoId) -> StoreResult<u32>;

    // ---- bounding boxes ----

    /// Bulk-insert boxes.
    async fn insert_boxes(&self, boxes: Vec<BoundingBox>) -> StoreResult<()>;

    async fn get_box(&self, id: &BoxId) -> StoreResult<BoundingBox>;

    /// Boxes of a frame ordered by ascending box id.
    async fn get_boxes_by_frame(&self, frame_id: &FrameId) -> StoreResult<Vec<BoundingBox>>;

    /// All boxes across the frames of a video.
    async fn get_boxes_by_video(&self, video_id: &VideoId) -> StoreResult<Vec<BoundingBox>>;

    /// Atomically update existing boxes (all-or-nothing).
    async fn update_boxes(&self, boxes: Vec<BoundingBox>) -> StoreResult<()>;

    async fn delete_box(&self, id: &BoxId) -> StoreResult<()>;

    /// Remove the prediction boxes of a frame, leaving human-confirmed
    /// boxes untouched. Returns the number removed.
    async fn delete_prediction_boxes_by_frame(&self, frame_id: &FrameId) -> StoreResult<u32>;

    // ---- labels ----

    /// Insert a label. Label names are unique within their project.
    async fn insert_label(&self, label: Label) -> StoreResult<Label>;

    async fn get_label(&self, id: &LabelId) -> StoreResult<Label>;

    async fn get_label_by_name(
        &self,
        project_id: &ProjectId,
        name: &str,
    ) -> StoreResult<Option<Label>>;

    /// Fetch the label with this name, creating it when absent.
    async fn get_or_create_label(&self, project_id: &ProjectId, name: &str) -> StoreResult<Label>;

    async fn get_labels_by_project(&self, project_id: &ProjectId) -> StoreResult<Vec<Label>>;

    /// Box counts per label, ordered by descending count then name.
    async fn label_counts_by_project(
        &self,
        project_id: &ProjectId,
    ) -> StoreResult<Vec<LabelCount>>;

    /// Reassign every box labeled `old` to `new`. Both labels must belong
    /// to the same project. Returns the number of boxes moved.
    async fn replace_label(&self, old: &LabelId, new: &LabelId) -> StoreResult<u32>;

    /// Delete a label, nulling `label_id` on boxes that still reference it.
    async fn delete_label(&self, id: &LabelId) -> StoreResult<()>;
}
