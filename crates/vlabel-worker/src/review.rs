//! Human review loop.
//!
//! Serves frame batches for annotation, applies box and sign-off edits,
//! and turns completed batches into a retrain/re-infer pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{error, info};

use vlabel_models::{BoundingBox, BoxGeometry, BoxId, Frame, FrameId, LabelId, VideoId};

use crate::error::{WorkerError, WorkerResult};
use crate::inference::retrain_and_reinfer;
use crate::pipeline::PipelineContext;

/// How the next batch of frames to review is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewPolicy {
    /// Uniformly random unreviewed frames
    RandomUnreviewed,
    /// Unreviewed frames closest to an anchor frame in feature space
    MostSimilarTo(FrameId),
    /// Unreviewed frames farthest from an anchor frame in feature space
    LeastSimilarTo(FrameId),
}

/// Coordinates the review loop against the datastore and the live
/// similarity indexes.
pub struct ReviewCoordinator {
    ctx: Arc<PipelineContext>,
}

impl ReviewCoordinator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Select up to `k` unreviewed frames of a video under the given
    /// policy. Similarity policies fail with `NotReady` until the video's
    /// index has been published.
    pub async fn next_review_batch(
        &self,
        video_id: &VideoId,
        policy: ReviewPolicy,
        k: usize,
    ) -> WorkerResult<Vec<Frame>> {
        let frames = self.ctx.store.get_frames_by_video(video_id).await?;
        let by_sequence: HashMap<u32, &Frame> =
            frames.iter().map(|f| (f.sequence_index, f)).collect();

        let mut batch = match policy {
            ReviewPolicy::RandomUnreviewed => {
                let unreviewed: Vec<&Frame> =
                    frames.iter().filter(|f| !f.human_reviewed).collect();
                let take = k.min(unreviewed.len());
                let mut rng = rand::rng();
                rand::seq::index::sample(&mut rng, unreviewed.len(), take)
                    .iter()
                    .map(|i| unreviewed[i].clone())
                    .collect::<Vec<Frame>>()
            }
            ReviewPolicy::MostSimilarTo(anchor_id) => {
                self.similarity_batch(video_id, &anchor_id, k, &frames, &by_sequence, true)
                    .await?
            }
            ReviewPolicy::LeastSimilarTo(anchor_id) => {
                self.similarity_batch(video_id, &anchor_id, k, &frames, &by_sequence, false)
                    .await?
            }
        };

        batch.sort_by_key(|f| f.sequence_index);
        Ok(batch)
    }

    async fn similarity_batch(
        &self,
        video_id: &VideoId,
        anchor_id: &FrameId,
        k: usize,
        frames: &[Frame],
        by_sequence: &HashMap<u32, &Frame>,
        most_similar: bool,
    ) -> WorkerResult<Vec<Frame>> {
        let anchor = self.ctx.store.get_frame(anchor_id).await?;
        if &anchor.video_id != video_id {
            return Err(WorkerError::validation(format!(
                "anchor frame {} does not belong to video {}",
                anchor_id, video_id
            )));
        }

        let index = self.ctx.registry.get(video_id).await?;

        // Already-reviewed frames are not review candidates.
        let exclude: HashSet<usize> = frames
            .iter()
            .filter(|f| f.human_reviewed)
            .map(|f| f.sequence_index as usize)
            .collect();

        let anchor_row = anchor.sequence_index as usize;
        let similar = if most_similar {
            index.k_most_similar(anchor_row, k, &exclude)?
        } else {
            index.k_least_similar(anchor_row, k, &exclude)?
        };

        Ok(similar
            .into_iter()
            .filter_map(|s| by_sequence.get(&(s.row as u32)).map(|f| (*f).clone()))
            .collect())
    }

    /// Mark frames as human-reviewed. Applied atomically.
    pub async fn mark_frames_reviewed(&self, frame_ids: &[FrameId]) -> WorkerResult<()> {
        let mut updates = Vec::with_capacity(frame_ids.len());
        for id in frame_ids {
            let mut frame = self.ctx.store.get_frame(id).await?;
            frame.human_reviewed = true;
            updates.push(frame);
        }
        self.ctx.store.update_frames(updates).await?;
        Ok(())
    }

    /// Re-open frames for another review pass. Clears `human_reviewed`;
    /// the frames' boxes stay as last set.
    pub async fn reopen_frames(&self, frame_ids: &[FrameId]) -> WorkerResult<()> {
        let mut updates = Vec::with_capacity(frame_ids.len());
        for id in frame_ids {
            let mut frame = self.ctx.store.get_frame(id).await?;
            frame.human_reviewed = false;
            updates.push(frame);
        }
        self.ctx.store.update_frames(updates).await?;
        Ok(())
    }

    /// Create a human-confirmed box on a frame.
    pub async fn create_box(
        &self,
        frame_id: &FrameId,
        label_id: Option<LabelId>,
        geometry: BoxGeometry,
    ) -> WorkerResult<BoundingBox> {
        geometry.validate()?;
        // Validates frame and label ownership at the datastore boundary.
        self.ctx.store.get_frame(frame_id).await?;

        let b = BoundingBox::human(frame_id.clone(), label_id, geometry);
        self.ctx.store.insert_boxes(vec![b.clone()]).await?;
        Ok(b)
    }

    /// Apply a batch of box edits. Every geometry in the batch is
    /// validated first; one invalid geometry rejects the whole batch with
    /// no stored state touched. Edited boxes become human-confirmed.
    pub async fn submit_box_updates(&self, boxes: Vec<BoundingBox>) -> WorkerResult<()> {
        for b in &boxes {
            b.geometry.validate()?;
        }
        let confirmed: Vec<BoundingBox> = boxes
            .into_iter()
            .map(|mut b| {
                b.prediction = false;
                b.confidence = None;
                b
            })
            .collect();
        self.ctx.store.update_boxes(confirmed).await?;
        Ok(())
    }

    pub async fn delete_box(&self, box_id: &BoxId) -> WorkerResult<()> {
        self.ctx.store.delete_box(box_id).await?;
        Ok(())
    }

    /// Reassign every box labeled `old` to `new` (same project only).
    /// Returns the number of boxes moved.
    pub async fn replace_label(&self, old: &LabelId, new: &LabelId) -> WorkerResult<u32> {
        Ok(self.ctx.store.replace_label(old, new).await?)
    }

    /// Delete a label; boxes still referencing it become unlabeled.
    pub async fn delete_label(&self, label_id: &LabelId) -> WorkerResult<()> {
        self.ctx.store.delete_label(label_id).await?;
        Ok(())
    }

    /// Complete a review batch: apply box edits, sign off the frames, then
    /// kick off a retrain/re-infer pass over the video's accumulated
    /// corrections in the background.
    ///
    /// Returns as soon as the edits are persisted. The video's
    /// `reinferring` flag is raised before this returns and lowered when
    /// the pass finishes, so callers poll the video row for completion.
    /// The pass runs under the video's lock so it never races a
    /// preprocessing pass.
    pub async fn submit_training_batch(
        &self,
        video_id: &VideoId,
        reviewed_frames: Vec<FrameId>,
        box_updates: Vec<BoundingBox>,
    ) -> WorkerResult<()> {
        self.submit_box_updates(box_updates).await?;
        self.mark_frames_reviewed(&reviewed_frames).await?;
        self.ctx.store.set_video_reinferring(video_id, true).await?;

        info!(
            video_id = %video_id,
            reviewed = reviewed_frames.len(),
            "Review batch submitted, starting retrain pass"
        );

        let ctx = Arc::clone(&self.ctx);
        let video_id = video_id.clone();
        tokio::spawn(async move {
            let _guard = ctx.locks.acquire(&video_id).await;
            let result = match ctx.store.get_video(&video_id).await {
                Ok(video) => {
                    retrain_and_reinfer(
                        ctx.store.as_ref(),
                        ctx.media.as_ref(),
                        ctx.detector.as_ref(),
                        ctx.config.min_confidence,
                        &video,
                    )
                    .await
                }
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                error!(video_id = %video_id, "Retrain pass failed: {}", e);
            }
            if let Err(e) = ctx.store.set_video_reinferring(&video_id, false).await {
                error!(video_id = %video_id, "Failed to clear re-inference flag: {}", e);
            }
        });
        Ok(())
    }
}
