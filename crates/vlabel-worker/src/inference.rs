//! Detection seeding and correction-driven re-inference.

use tracing::{info, warn};

use vlabel_ml_client::{Correction, ObjectDetector};
use vlabel_models::{BoundingBox, Frame, Label, LabelId, PreprocessStatus, Video};
use vlabel_storage::MediaStore;
use vlabel_store::Datastore;

use crate::error::WorkerResult;

/// Run object detection over freshly extracted frames and persist the
/// results as prediction boxes.
///
/// Detected class names are mapped to project labels, created on first
/// sight. Candidates below `min_confidence` are dropped, as are candidates
/// with degenerate geometry. A frame whose detection call fails is skipped
/// with a warning; seeding is best-effort and never fails the video.
pub async fn seed_inference(
    store: &dyn Datastore,
    media: &dyn MediaStore,
    detector: &dyn ObjectDetector,
    min_confidence: f32,
    frames: &[Frame],
) -> WorkerResult<()> {
    let mut seeded = 0usize;
    let mut skipped = 0usize;

    for frame in frames {
        // Never clobber a frame a human has already signed off on.
        if frame.human_reviewed {
            continue;
        }

        // Stop promptly when the video was cancelled mid-pass.
        let status = store.get_video(&frame.video_id).await?.preprocessing_status;
        if status == PreprocessStatus::Failed {
            warn!(video_id = %frame.video_id, "Inference stopped: video was marked failed");
            return Ok(());
        }

        let image = media.get(&frame.frame_url).await?;
        let candidates = match detector.detect(&image).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    frame_id = %frame.id,
                    sequence_index = frame.sequence_index,
                    "Detection failed, skipping frame: {}",
                    e
                );
                skipped += 1;
                continue;
            }
        };

        // Replace any predictions from a previous pass on this frame.
        store.delete_prediction_boxes_by_frame(&frame.id).await?;

        let mut boxes = Vec::new();
        for candidate in candidates {
            if candidate.confidence < min_confidence {
                continue;
            }
            if let Err(e) = candidate.geometry.validate() {
                warn!(frame_id = %frame.id, "Dropping degenerate detection: {}", e);
                continue;
            }
            let label = store
                .get_or_create_label(&frame.project_id, &candidate.label_name)
                .await?;
            boxes.push(BoundingBox::prediction(
                frame.id.clone(),
                Some(label.id),
                candidate.geometry,
                candidate.confidence,
            ));
        }

        seeded += boxes.len();
        if !boxes.is_empty() {
            store.insert_boxes(boxes).await?;
        }
    }

    info!(seeded, skipped, "Seed inference complete");
    Ok(())
}

/// Collect the human-confirmed boxes of a video as fine-tuning corrections.
pub async fn collect_corrections(
    store: &dyn Datastore,
    video: &Video,
) -> WorkerResult<Vec<Correction>> {
    let labels = store.get_labels_by_project(&video.project_id).await?;
    let label_name = |label_id: &LabelId| -> Option<&str> {
        labels
            .iter()
            .find(|l: &&Label| &l.id == label_id)
            .map(|l| l.name.as_str())
    };

    let mut corrections = Vec::new();
    for b in store.get_boxes_by_video(&video.id).await? {
        if b.prediction {
            continue;
        }
        let Some(label_id) = &b.label_id else {
            continue;
        };
        let Some(name) = label_name(label_id) else {
            continue;
        };
        corrections.push(Correction {
            label_name: name.to_string(),
            geometry: b.geometry,
            image_features: b.image_features.clone(),
        });
    }
    Ok(corrections)
}

/// Feed the video's human corrections to the detection backend, then
/// regenerate predictions on its unreviewed frames.
///
/// Reviewed frames and human-confirmed boxes are never touched; only
/// stale predictions are replaced.
pub async fn retrain_and_reinfer(
    store: &dyn Datastore,
    media: &dyn MediaStore,
    detector: &dyn ObjectDetector,
    min_confidence: f32,
    video: &Video,
) -> WorkerResult<()> {
    let corrections = collect_corrections(store, video).await?;
    if corrections.is_empty() {
        info!(video_id = %video.id, "No corrections to train on, re-inferring as-is");
    } else {
        info!(
            video_id = %video.id,
            corrections = corrections.len(),
            "Fine-tuning detection backend"
        );
        detector.fine_tune(&corrections).await?;
    }

    let frames = store.get_frames_by_video(&video.id).await?;
    let unreviewed: Vec<Frame> = frames.into_iter().filter(|f| !f.human_reviewed).collect();
    info!(
        video_id = %video.id,
        frames = unreviewed.len(),
        "Re-inferring unreviewed frames"
    );

    seed_inference(store, media, detector, min_confidence, &unreviewed).await
}
