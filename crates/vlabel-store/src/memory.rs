//! In-process datastore implementation.
//!
//! All entities live behind a single `RwLock`, so batch updates are
//! naturally transactional: the batch is validated in full before any row
//! is written, and the write happens under one lock acquisition.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use vlabel_models::{
    BoundingBox, BoxId, Frame, FrameId, Label, LabelId, PreprocessStatus, Project, ProjectId,
    Video, VideoId,
};

use crate::datastore::{Datastore, LabelCount};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
struct State {
    projects: BTreeMap<String, Project>,
    videos: BTreeMap<String, Video>,
    frames: BTreeMap<String, Frame>,
    boxes: BTreeMap<String, BoundingBox>,
    labels: BTreeMap<String, Label>,
}

impl State {
    fn project(&self, id: &ProjectId) -> StoreResult<&Project> {
        self.projects
            .get(id.as_str())
            .ok_or_else(|| StoreError::not_found("project", id.as_str()))
    }

    fn video(&self, id: &VideoId) -> StoreResult<&Video> {
        self.videos
            .get(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))
    }

    fn frame(&self, id: &FrameId) -> StoreResult<&Frame> {
        self.frames
            .get(id.as_str())
            .ok_or_else(|| StoreError::not_found("frame", id.as_str()))
    }

    fn label(&self, id: &LabelId) -> StoreResult<&Label> {
        self.labels
            .get(id.as_str())
            .ok_or_else(|| StoreError::not_found("label", id.as_str()))
    }

    /// A box's label must belong to the same project as the box's frame.
    fn check_box_invariants(&self, bbox: &BoundingBox) -> StoreResult<()> {
        let frame = self.frame(&bbox.frame_id)?;
        if let Some(ref label_id) = bbox.label_id {
            let label = self.label(label_id)?;
            if label.project_id != frame.project_id {
                return Err(StoreError::conflict(format!(
                    "label {} belongs to project {}, box frame to project {}",
                    label_id, label.project_id, frame.project_id
                )));
            }
        }
        Ok(())
    }
}

/// `Datastore` backed by process-local maps.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn create_project(&self, project: Project) -> StoreResult<Project> {
        let mut state = self.state.write().await;
        if state.projects.values().any(|p| p.name == project.name) {
            return Err(StoreError::conflict(format!(
                "project name already taken: {}",
                project.name
            )));
        }
        state
            .projects
            .insert(project.id.as_str().to_string(), project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &ProjectId) -> StoreResult<Project> {
        Ok(self.state.read().await.project(id)?.clone())
    }

    async fn get_project_by_name(&self, name: &str) -> StoreResult<Option<Project>> {
        Ok(self
            .state
            .read()
            .await
            .projects
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        Ok(self.state.read().await.projects.values().cloned().collect())
    }

    async fn delete_project(&self, id: &ProjectId) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.project(id)?;

        let video_ids: Vec<String> = state
            .videos
            .values()
            .filter(|v| &v.project_id == id)
            .map(|v| v.id.as_str().to_string())
            .collect();
        let frame_ids: Vec<String> = state
            .frames
            .values()
            .filter(|f| &f.project_id == id)
            .map(|f| f.id.as_str().to_string())
            .collect();
        let box_ids: Vec<String> = state
            .boxes
            .values()
            .filter(|b| frame_ids.contains(&b.frame_id.as_str().to_string()))
            .map(|b| b.id.as_str().to_string())
            .collect();
        let label_ids: Vec<String> = state
            .labels
            .values()
            .filter(|l| &l.project_id == id)
            .map(|l| l.id.as_str().to_string())
            .collect();

        for bid in box_ids {
            state.boxes.remove(&bid);
        }
        for fid in frame_ids {
            state.frames.remove(&fid);
        }
        for vid in video_ids {
            state.videos.remove(&vid);
        }
        for lid in label_ids {
            state.labels.remove(&lid);
        }
        state.projects.remove(id.as_str());

        debug!(project_id = %id, "Deleted project cascade");
        Ok(())
    }

    async fn percent_frames_reviewed(&self, project_id: &ProjectId) -> StoreResult<f64> {
        let state = self.state.read().await;
        state.project(project_id)?;

        let (total, reviewed) = state
            .frames
            .values()
            .filter(|f| &f.project_id == project_id)
            .fold((0u64, 0u64), |(t, r), f| {
                (t + 1, r + u64::from(f.human_reviewed))
            });

        if total == 0 {
            return Ok(0.0);
        }
        Ok(reviewed as f64 / total as f64 * 100.0)
    }

    async fn create_video(&self, video: Video) -> StoreResult<Video> {
        let mut state = self.state.write().await;
        state.project(&video.project_id)?;
        if state
            .videos
            .values()
            .any(|v| v.project_id == video.project_id && v.name == video.name)
        {
            return Err(StoreError::conflict(format!(
                "video name already taken in project: {}",
                video.name
            )));
        }
        state
            .videos
            .insert(video.id.as_str().to_string(), video.clone());
        Ok(video)
    }

    async fn get_video(&self, id: &VideoId) -> StoreResult<Video> {
        Ok(self.state.read().await.video(id)?.clone())
    }

    async fn list_videos_by_project(&self, project_id: &ProjectId) -> StoreResult<Vec<Video>> {
        Ok(self
            .state
            .read()
            .await
            .videos
            .values()
            .filter(|v| &v.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn advance_video_status(
        &self,
        id: &VideoId,
        next: PreprocessStatus,
    ) -> StoreResult<Video> {
        let mut state = self.state.write().await;
        let video = state
            .videos
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))?;
        let current = video.preprocessing_status;
        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        video.preprocessing_status = next;
        if next == PreprocessStatus::Success {
            video.error_message = None;
        }
        Ok(video.clone())
    }

    async fn mark_video_failed(&self, id: &VideoId, error: &str) -> StoreResult<Video> {
        let mut state = self.state.write().await;
        let video = state
            .videos
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))?;
        if !video.preprocessing_status.is_terminal() {
            video.preprocessing_status = PreprocessStatus::Failed;
            video.error_message = Some(error.to_string());
        }
        Ok(video.clone())
    }

    async fn reset_video_for_rerun(
        &self,
        id: &VideoId,
        status: PreprocessStatus,
    ) -> StoreResult<Video> {
        let mut state = self.state.write().await;
        let video = state
            .videos
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))?;
        let current = video.preprocessing_status;
        if !current.is_terminal() {
            return Err(StoreError::InvalidTransition {
                from: current,
                to: status,
            });
        }
        video.preprocessing_status = status;
        video.error_message = None;
        Ok(video.clone())
    }

    async fn set_video_reinferring(&self, id: &VideoId, reinferring: bool) -> StoreResult<Video> {
        let mut state = self.state.write().await;
        let video = state
            .videos
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))?;
        video.reinferring = reinferring;
        Ok(video.clone())
    }

    async fn set_video_artifacts(
        &self,
        id: &VideoId,
        frame_features_url: Option<String>,
        frame_similarity_url: Option<String>,
    ) -> StoreResult<Video> {
        let mut state = self.state.write().await;
        let video = state
            .videos
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::not_found("video", id.as_str()))?;
        if let Some(url) = frame_features_url {
            video.frame_features_url = Some(url);
        }
        if let Some(url) = frame_similarity_url {
            video.frame_similarity_url = Some(url);
        }
        Ok(video.clone())
    }

    async fn delete_video(&self, id: &VideoId) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.video(id)?;

        let frame_ids: Vec<String> = state
            .frames
            .values()
            .filter(|f| &f.video_id == id)
            .map(|f| f.id.as_str().to_string())
            .collect();
        let box_ids: Vec<String> = state
            .boxes
            .values()
            .filter(|b| frame_ids.contains(&b.frame_id.as_str().to_string()))
            .map(|b| b.id.as_str().to_string())
            .collect();

        for bid in box_ids {
            state.boxes.remove(&bid);
        }
        for fid in frame_ids {
            state.frames.remove(&fid);
        }
        state.videos.remove(id.as_str());
        Ok(())
    }

    async fn insert_frames(&self, frames: Vec<Frame>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for frame in &frames {
            let video = state.video(&frame.video_id)?;
            if video.project_id != frame.project_id {
                return Err(StoreError::conflict(format!(
                    "frame project {} does not match video project {}",
                    frame.project_id, video.project_id
                )));
            }
            let duplicate = state.frames.values().any(|f| {
                f.video_id == frame.video_id && f.sequence_index == frame.sequence_index
            });
            if duplicate {
                return Err(StoreError::conflict(format!(
                    "duplicate sequence index {} in video {}",
                    frame.sequence_index, frame.video_id
                )));
            }
        }
        for frame in frames {
            state.frames.insert(frame.id.as_str().to_string(), frame);
        }
        Ok(())
    }

    async fn get_frame(&self, id: &FrameId) -> StoreResult<Frame> {
        Ok(self.state.read().await.frame(id)?.clone())
    }

    async fn get_frames_by_video(&self, video_id: &VideoId) -> StoreResult<Vec<Frame>> {
        let state = self.state.read().await;
        let mut frames: Vec<Frame> = state
            .frames
            .values()
            .filter(|f| &f.video_id == video_id)
            .cloned()
            .collect();
        frames.sort_by_key(|f| f.sequence_index);
        Ok(frames)
    }

    async fn get_frames_by_project(&self, project_id: &ProjectId) -> StoreResult<Vec<Frame>> {
        Ok(self
            .state
            .read()
            .await
            .frames
            .values()
            .filter(|f| &f.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn update_frames(&self, frames: Vec<Frame>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        // Validate the whole batch before any write
        for frame in &frames {
            let existing = state.frame(&frame.id)?;
            if existing.video_id != frame.video_id || existing.project_id != frame.project_id {
                return Err(StoreError::validation(format!(
                    "frame {} may not change its owning video or project",
                    frame.id
                )));
            }
        }
        for frame in frames {
            state.frames.insert(frame.id.as_str().to_string(), frame);
        }
        Ok(())
    }

    async fn delete_frames_by_video(&self, video_id: &VideoId) -> StoreResult<u32> {
        let mut state = self.state.write().await;
        let frame_ids: Vec<String> = state
            .frames
            .values()
            .filter(|f| &f.video_id == video_id)
            .map(|f| f.id.as_str().to_string())
            .collect();
        let box_ids: Vec<String> = state
            .boxes
            .values()
            .filter(|b| frame_ids.contains(&b.frame_id.as_str().to_string()))
            .map(|b| b.id.as_str().to_string())
            .collect();

        for bid in box_ids {
            state.boxes.remove(&bid);
        }
        for fid in &frame_ids {
            state.frames.remove(fid);
        }
        Ok(frame_ids.len() as u32)
    }

    async fn insert_boxes(&self, boxes: Vec<BoundingBox>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for bbox in &boxes {
            state.check_box_invariants(bbox)?;
        }
        for bbox in boxes {
            state.boxes.insert(bbox.id.as_str().to_string(), bbox);
        }
        Ok(())
    }

    async fn get_box(&self, id: &BoxId) -> StoreResult<BoundingBox> {
        self.state
            .read()
            .await
            .boxes
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::not_found("bounding box", id.as_str()))
    }

    async fn get_boxes_by_frame(&self, frame_id: &FrameId) -> StoreResult<Vec<BoundingBox>> {
        let state = self.state.read().await;
        let mut boxes: Vec<BoundingBox> = state
            .boxes
            .values()
            .filter(|b| &b.frame_id == frame_id)
            .cloned()
            .collect();
        boxes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(boxes)
    }

    async fn get_boxes_by_video(&self, video_id: &VideoId) -> StoreResult<Vec<BoundingBox>> {
        let state = self.state.read().await;
        let frame_ids: Vec<&str> = state
            .frames
            .values()
            .filter(|f| &f.video_id == video_id)
            .map(|f| f.id.as_str())
            .collect();
        let mut boxes: Vec<BoundingBox> = state
            .boxes
            .values()
            .filter(|b| frame_ids.contains(&b.frame_id.as_str()))
            .cloned()
            .collect();
        boxes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(boxes)
    }

    async fn update_boxes(&self, boxes: Vec<BoundingBox>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        // Validate the whole batch before any write
        for bbox in &boxes {
            if !state.boxes.contains_key(bbox.id.as_str()) {
                return Err(StoreError::not_found("bounding box", bbox.id.as_str()));
            }
            state.check_box_invariants(bbox)?;
        }
        for bbox in boxes {
            state.boxes.insert(bbox.id.as_str().to_string(), bbox);
        }
        Ok(())
    }

    async fn delete_box(&self, id: &BoxId) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .boxes
            .remove(id.as_str())
            .ok_or_else(|| StoreError::not_found("bounding box", id.as_str()))?;
        Ok(())
    }

    async fn delete_prediction_boxes_by_frame(&self, frame_id: &FrameId) -> StoreResult<u32> {
        let mut state = self.state.write().await;
        let ids: Vec<String> = state
            .boxes
            .values()
            .filter(|b| &b.frame_id == frame_id && b.prediction)
            .map(|b| b.id.as_str().to_string())
            .collect();
        for id in &ids {
            state.boxes.remove(id);
        }
        Ok(ids.len() as u32)
    }

    async fn insert_label(&self, label: Label) -> StoreResult<Label> {
        let mut state = self.state.write().await;
        state.project(&label.project_id)?;
        if state
            .labels
            .values()
            .any(|l| l.project_id == label.project_id && l.name == label.name)
        {
            return Err(StoreError::conflict(format!(
                "label name already taken in project: {}",
                label.name
            )));
        }
        state
            .labels
            .insert(label.id.as_str().to_string(), label.clone());
        Ok(label)
    }

    async fn get_label(&self, id: &LabelId) -> StoreResult<Label> {
        Ok(self.state.read().await.label(id)?.clone())
    }

    async fn get_label_by_name(
        &self,
        project_id: &ProjectId,
        name: &str,
    ) -> StoreResult<Option<Label>> {
        Ok(self
            .state
            .read()
            .await
            .labels
            .values()
            .find(|l| &l.project_id == project_id && l.name == name)
            .cloned())
    }

    async fn get_or_create_label(&self, project_id: &ProjectId, name: &str) -> StoreResult<Label> {
        let mut state = self.state.write().await;
        state.project(project_id)?;
        if let Some(label) = state
            .labels
            .values()
            .find(|l| &l.project_id == project_id && l.name == name)
        {
            return Ok(label.clone());
        }
        let label = Label::new(project_id.clone(), name);
        state
            .labels
            .insert(label.id.as_str().to_string(), label.clone());
        Ok(label)
    }

    async fn get_labels_by_project(&self, project_id: &ProjectId) -> StoreResult<Vec<Label>> {
        let mut labels: Vec<Label> = self
            .state
            .read()
            .await
            .labels
            .values()
            .filter(|l| &l.project_id == project_id)
            .cloned()
            .collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(labels)
    }

    async fn label_counts_by_project(
        &self,
        project_id: &ProjectId,
    ) -> StoreResult<Vec<LabelCount>> {
        let state = self.state.read().await;
        let mut counts: Vec<LabelCount> = state
            .labels
            .values()
            .filter(|l| &l.project_id == project_id)
            .map(|l| LabelCount {
                label_id: l.id.clone(),
                name: l.name.clone(),
                box_count: state
                    .boxes
                    .values()
                    .filter(|b| b.label_id.as_ref() == Some(&l.id))
                    .count() as u64,
            })
            .collect();
        counts.sort_by(|a, b| b.box_count.cmp(&a.box_count).then(a.name.cmp(&b.name)));
        Ok(counts)
    }

    async fn replace_label(&self, old: &LabelId, new: &LabelId) -> StoreResult<u32> {
        let mut state = self.state.write().await;
        let old_label = state.label(old)?.clone();
        let new_label = state.label(new)?.clone();
        if old_label.project_id != new_label.project_id {
            return Err(StoreError::conflict(
                "labels belong to different projects".to_string(),
            ));
        }

        let mut moved = 0;
        for bbox in state.boxes.values_mut() {
            if bbox.label_id.as_ref() == Some(old) {
                bbox.label_id = Some(new.clone());
                moved += 1;
            }
        }
        debug!(old = %old, new = %new, moved, "Replaced label on boxes");
        Ok(moved)
    }

    async fn delete_label(&self, id: &LabelId) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.label(id)?;
        for bbox in state.boxes.values_mut() {
            if bbox.label_id.as_ref() == Some(id) {
                bbox.label_id = None;
            }
        }
        state.labels.remove(id.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlabel_models::BoxGeometry;

    async fn seed_project(store: &MemoryStore) -> (Project, Video, Vec<Frame>) {
        let project = store
            .create_project(Project::new("test", 1.0))
            .await
            .unwrap();
        let video = store
            .create_video(Video::new(project.id.clone(), "v.mp4", "k/raw", 10))
            .await
            .unwrap();
        let frames: Vec<Frame> = (0..4)
            .map(|i| Frame::new(project.id.clone(), video.id.clone(), i, format!("f{i}"), 64, 48))
            .collect();
        store.insert_frames(frames.clone()).await.unwrap();
        (project, video, frames)
    }

    #[tokio::test]
    async fn test_duplicate_project_name_rejected() {
        let store = MemoryStore::new();
        store.create_project(Project::new("p", 1.0)).await.unwrap();
        let err = store
            .create_project(Project::new("p", 2.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_duplicate_sequence_index_rejected() {
        let store = MemoryStore::new();
        let (project, video, _) = seed_project(&store).await;
        let dup = Frame::new(project.id, video.id, 2, "dup", 64, 48);
        let err = store.insert_frames(vec![dup]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_status_transition_enforced() {
        let store = MemoryStore::new();
        let (_, video, _) = seed_project(&store).await;

        store
            .advance_video_status(&video.id, PreprocessStatus::Extracting)
            .await
            .unwrap();
        let err = store
            .advance_video_status(&video.id, PreprocessStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_rerun_requires_terminal_status() {
        let store = MemoryStore::new();
        let (_, video, _) = seed_project(&store).await;

        let err = store
            .reset_video_for_rerun(&video.id, PreprocessStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        store
            .mark_video_failed(&video.id, "decode error")
            .await
            .unwrap();
        let video = store
            .reset_video_for_rerun(&video.id, PreprocessStatus::Pending)
            .await
            .unwrap();
        assert_eq!(video.preprocessing_status, PreprocessStatus::Pending);
        assert!(video.error_message.is_none());
    }

    #[tokio::test]
    async fn test_update_boxes_is_all_or_nothing() {
        let store = MemoryStore::new();
        let (_, _, frames) = seed_project(&store).await;

        let geom = BoxGeometry::from_corners(0.0, 0.0, 10.0, 10.0);
        let b1 = BoundingBox::human(frames[0].id.clone(), None, geom);
        store.insert_boxes(vec![b1.clone()]).await.unwrap();

        // Second box in the batch does not exist; nothing may be written.
        let mut changed = b1.clone();
        changed.geometry = BoxGeometry::from_corners(1.0, 1.0, 5.0, 5.0);
        let ghost = BoundingBox::human(frames[0].id.clone(), None, geom);

        let err = store.update_boxes(vec![changed, ghost]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let stored = store.get_box(&b1.id).await.unwrap();
        assert_eq!(stored.geometry, geom);
    }

    #[tokio::test]
    async fn test_replace_then_delete_label() {
        let store = MemoryStore::new();
        let (project, _, frames) = seed_project(&store).await;

        let label_a = store.get_or_create_label(&project.id, "cat").await.unwrap();
        let label_b = store.get_or_create_label(&project.id, "dog").await.unwrap();

        let geom = BoxGeometry::from_corners(0.0, 0.0, 10.0, 10.0);
        let boxes: Vec<BoundingBox> = (0..3)
            .map(|i| BoundingBox::human(frames[i].id.clone(), Some(label_a.id.clone()), geom))
            .collect();
        store.insert_boxes(boxes).await.unwrap();
        store
            .insert_boxes(vec![BoundingBox::human(
                frames[3].id.clone(),
                Some(label_b.id.clone()),
                geom,
            )])
            .await
            .unwrap();

        let moved = store.replace_label(&label_a.id, &label_b.id).await.unwrap();
        assert_eq!(moved, 3);

        store.delete_label(&label_a.id).await.unwrap();

        let counts = store.label_counts_by_project(&project.id).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].name, "dog");
        assert_eq!(counts[0].box_count, 4);
    }

    #[tokio::test]
    async fn test_percent_frames_reviewed() {
        let store = MemoryStore::new();
        let (project, _, mut frames) = seed_project(&store).await;

        frames[0].human_reviewed = true;
        frames[1].human_reviewed = true;
        store
            .update_frames(vec![frames[0].clone(), frames[1].clone()])
            .await
            .unwrap();

        let percent = store.percent_frames_reviewed(&project.id).await.unwrap();
        assert!((percent - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_cross_project_label_rejected() {
        let store = MemoryStore::new();
        let (_, _, frames) = seed_project(&store).await;
        let other = store
            .create_project(Project::new("other", 1.0))
            .await
            .unwrap();
        let foreign = store.get_or_create_label(&other.id, "cat").await.unwrap();

        let geom = BoxGeometry::from_corners(0.0, 0.0, 10.0, 10.0);
        let bbox = BoundingBox::human(frames[0].id.clone(), Some(foreign.id), geom);
        let err = store.insert_boxes(vec![bbox]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
