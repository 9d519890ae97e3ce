//! End-to-end preprocessing pipeline tests against in-memory backends.

mod support;

use std::collections::HashSet;
use std::sync::Arc;

use vlabel_index::{FeatureArtifact, Metric, SimilarityArtifact};
use vlabel_models::{PreprocessStatus, Project, Video};
use vlabel_storage::{decode_artifact, encode_artifact, similarity_key, MediaStore, CONTENT_TYPE_GZIP};
use vlabel_store::Datastore;
use vlabel_worker::{PipelineContext, PipelineService, ReviewCoordinator, ReviewPolicy};

use support::{candidate, harness, FailingFrameSource, StubDetector, StubEmbedder, StubFrameSource};

async fn seed_project(h: &support::Harness) -> Project {
    h.store
        .create_project(Project::new("wildlife", 1.0))
        .await
        .unwrap()
}

async fn upload(h: &support::Harness, project: &Project) -> Video {
    h.service
        .upload_video(&project.id, "clip.mp4", vec![0u8; 128])
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_pipeline_reaches_success() {
    let h = harness(
        Arc::new(StubFrameSource {
            count: 64,
            width: 100,
            height: 100,
        }),
        Arc::new(StubEmbedder::new(4)),
        Arc::new(StubDetector::new(vec![
            candidate("person", 0.9),
            candidate("tree", 0.2),
        ])),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;

    h.service.preprocess_video(&video.id).await.unwrap();

    let video = h.store.get_video(&video.id).await.unwrap();
    assert_eq!(video.preprocessing_status, PreprocessStatus::Success);
    assert!(video.frame_features_url.is_some());
    assert!(video.frame_similarity_url.is_some());
    assert!(h.registry.contains(&video.id).await);

    // Frames are gap-free from 0 and carry probe dimensions.
    let frames = h.store.get_frames_by_video(&video.id).await.unwrap();
    assert_eq!(frames.len(), 64);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.sequence_index, i as u32);
        assert_eq!(frame.width, 100);
        assert!(!frame.human_reviewed);
    }

    // The feature artifact matches the stub embeddings row for row.
    let bytes = h
        .media
        .get(video.frame_features_url.as_deref().unwrap())
        .await
        .unwrap();
    let features: FeatureArtifact = decode_artifact(&bytes).unwrap();
    assert_eq!(features.dim, 4);
    assert_eq!(features.vectors[2], vec![3.0; 4]);

    // One prediction per frame; the low-confidence candidate was dropped
    // and its label never created.
    let boxes = h.store.get_boxes_by_video(&video.id).await.unwrap();
    assert_eq!(boxes.len(), 64);
    assert!(boxes.iter().all(|b| b.prediction));

    let labels = h.store.get_labels_by_project(&project.id).await.unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].name, "person");
}

#[tokio::test]
async fn test_submit_video_preprocesses_in_the_background() {
    let h = harness(
        Arc::new(StubFrameSource {
            count: 2,
            width: 64,
            height: 64,
        }),
        Arc::new(StubEmbedder::new(4)),
        Arc::new(StubDetector::new(vec![])),
    );
    let project = seed_project(&h).await;

    let video = h
        .service
        .submit_video(&project.id, "clip.mp4", vec![0u8; 128])
        .await
        .unwrap();
    assert_eq!(video.preprocessing_status, PreprocessStatus::Pending);

    let mut status = video.preprocessing_status;
    for _ in 0..200 {
        status = h
            .store
            .get_video(&video.id)
            .await
            .unwrap()
            .preprocessing_status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status, PreprocessStatus::Success);
}

#[tokio::test]
async fn test_undecodable_input_marks_video_failed() {
    let h = harness(
        Arc::new(FailingFrameSource),
        Arc::new(StubEmbedder::new(4)),
        Arc::new(StubDetector::new(vec![])),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;

    let result = h.service.preprocess_video(&video.id).await;
    assert!(result.is_err());

    let video = h.store.get_video(&video.id).await.unwrap();
    assert_eq!(video.preprocessing_status, PreprocessStatus::Failed);
    assert!(video
        .error_message
        .as_deref()
        .unwrap()
        .contains("not a video"));
    assert!(h
        .store
        .get_frames_by_video(&video.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_embed_failure_falls_back_to_zero_vector() {
    let mut embedder = StubEmbedder::new(4);
    embedder.fail_on = HashSet::from([1u8]);

    let h = harness(
        Arc::new(StubFrameSource {
            count: 3,
            width: 64,
            height: 64,
        }),
        Arc::new(embedder),
        Arc::new(StubDetector::new(vec![])),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;

    h.service.preprocess_video(&video.id).await.unwrap();

    let video = h.store.get_video(&video.id).await.unwrap();
    assert_eq!(video.preprocessing_status, PreprocessStatus::Success);

    let bytes = h
        .media
        .get(video.frame_features_url.as_deref().unwrap())
        .await
        .unwrap();
    let features: FeatureArtifact = decode_artifact(&bytes).unwrap();
    assert_eq!(features.vectors[1], vec![0.0; 4]);
    assert_ne!(features.vectors[0], vec![0.0; 4]);
}

#[tokio::test]
async fn test_rerun_recovers_a_failed_video() {
    let h = harness(
        Arc::new(FailingFrameSource),
        Arc::new(StubEmbedder::new(4)),
        Arc::new(StubDetector::new(vec![candidate("person", 0.9)])),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;

    assert!(h.service.preprocess_video(&video.id).await.is_err());

    // Same stores, working frame source this time.
    let ctx = Arc::new(PipelineContext {
        store: h.store.clone(),
        media: h.media.clone(),
        embedder: Arc::new(StubEmbedder::new(4)),
        detector: Arc::new(StubDetector::new(vec![candidate("person", 0.9)])),
        frame_source: Arc::new(StubFrameSource {
            count: 2,
            width: 64,
            height: 64,
        }),
        registry: h.registry.clone(),
        locks: h.ctx.locks.clone(),
        config: h.ctx.config.clone(),
    });
    let service = PipelineService::new(ctx);

    service.rerun_video(&video.id).await.unwrap();

    let video = h.store.get_video(&video.id).await.unwrap();
    assert_eq!(video.preprocessing_status, PreprocessStatus::Success);
    assert!(video.error_message.is_none());
    assert_eq!(
        h.store.get_frames_by_video(&video.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_rerun_skips_completed_stages() {
    let detector = Arc::new(StubDetector::new(vec![candidate("person", 0.9)]));
    let h = harness(
        Arc::new(StubFrameSource {
            count: 3,
            width: 64,
            height: 64,
        }),
        Arc::new(StubEmbedder::new(4)),
        detector.clone(),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;

    h.service.preprocess_video(&video.id).await.unwrap();
    let first_pass_detects = detector.detect_count();
    let frame_ids: Vec<_> = h
        .store
        .get_frames_by_video(&video.id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();

    h.service.rerun_video(&video.id).await.unwrap();

    // Extraction, embedding and indexing were all skipped: the frame rows
    // survived untouched while inference ran again.
    let rerun_ids: Vec<_> = h
        .store
        .get_frames_by_video(&video.id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(frame_ids, rerun_ids);
    assert!(detector.detect_count() > first_pass_detects);

    let video = h.store.get_video(&video.id).await.unwrap();
    assert_eq!(video.preprocessing_status, PreprocessStatus::Success);
}

#[tokio::test]
async fn test_rerun_reloads_the_persisted_similarity_index() {
    let h = harness(
        Arc::new(StubFrameSource {
            count: 3,
            width: 64,
            height: 64,
        }),
        Arc::new(StubEmbedder::new(4)),
        Arc::new(StubDetector::new(vec![])),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;
    h.service.preprocess_video(&video.id).await.unwrap();

    // Overwrite the stored artifact with a doctored matrix that puts
    // frame 1 farthest from frame 0, then drop the live index as a
    // process restart would.
    let doctored = SimilarityArtifact {
        metric: Metric::Euclidean,
        n: 3,
        matrix: vec![
            vec![0.0, 10.0, 1.0],
            vec![10.0, 0.0, 1.0],
            vec![1.0, 1.0, 0.0],
        ],
    };
    let key = similarity_key(&project.id, &video.id);
    h.media
        .put(&key, encode_artifact(&doctored).unwrap(), CONTENT_TYPE_GZIP)
        .await
        .unwrap();
    h.registry.remove(&video.id).await;

    h.service.rerun_video(&video.id).await.unwrap();
    assert!(h.registry.contains(&video.id).await);

    // The doctored ranking is visible, so the index came from the stored
    // artifact rather than a rebuild.
    let frames = h.store.get_frames_by_video(&video.id).await.unwrap();
    let coordinator = ReviewCoordinator::new(h.ctx.clone());
    let batch = coordinator
        .next_review_batch(
            &video.id,
            ReviewPolicy::LeastSimilarTo(frames[0].id.clone()),
            1,
        )
        .await
        .unwrap();
    assert_eq!(batch[0].sequence_index, 1);
}

#[tokio::test]
async fn test_duplicate_preprocess_request_is_a_noop() {
    let h = harness(
        Arc::new(StubFrameSource {
            count: 2,
            width: 64,
            height: 64,
        }),
        Arc::new(StubEmbedder::new(4)),
        Arc::new(StubDetector::new(vec![])),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;

    // Simulate a pass in flight by holding the video's lock.
    let _guard = h.ctx.locks.try_acquire(&video.id).await.unwrap();

    h.service.preprocess_video(&video.id).await.unwrap();

    let video = h.store.get_video(&video.id).await.unwrap();
    assert_eq!(video.preprocessing_status, PreprocessStatus::Pending);
}

#[tokio::test]
async fn test_cancelled_video_does_not_restart() {
    let h = harness(
        Arc::new(StubFrameSource {
            count: 2,
            width: 64,
            height: 64,
        }),
        Arc::new(StubEmbedder::new(4)),
        Arc::new(StubDetector::new(vec![])),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;

    h.service.cancel_video(&video.id).await.unwrap();
    h.service.preprocess_video(&video.id).await.unwrap();

    let video = h.store.get_video(&video.id).await.unwrap();
    assert_eq!(video.preprocessing_status, PreprocessStatus::Failed);
    assert_eq!(video.error_message.as_deref(), Some("cancelled by user"));
}

#[tokio::test]
async fn test_delete_project_removes_every_trace() {
    let h = harness(
        Arc::new(StubFrameSource {
            count: 2,
            width: 64,
            height: 64,
        }),
        Arc::new(StubEmbedder::new(4)),
        Arc::new(StubDetector::new(vec![candidate("person", 0.9)])),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;
    h.service.preprocess_video(&video.id).await.unwrap();

    h.service.delete_project(&project.id).await.unwrap();

    assert!(h.store.get_project(&project.id).await.is_err());
    assert!(h.store.get_video(&video.id).await.is_err());
    assert!(!h.registry.contains(&video.id).await);
    assert!(h.media.is_empty().await);
}

#[tokio::test]
async fn test_delete_video_removes_rows_objects_and_index() {
    let h = harness(
        Arc::new(StubFrameSource {
            count: 2,
            width: 64,
            height: 64,
        }),
        Arc::new(StubEmbedder::new(4)),
        Arc::new(StubDetector::new(vec![candidate("person", 0.9)])),
    );
    let project = seed_project(&h).await;
    let video = upload(&h, &project).await;
    h.service.preprocess_video(&video.id).await.unwrap();

    h.service.delete_video(&video.id).await.unwrap();

    assert!(h.store.get_video(&video.id).await.is_err());
    assert!(!h.registry.contains(&video.id).await);
    let features = vlabel_storage::features_key(&project.id, &video.id);
    assert!(!h.media.exists(&features).await.unwrap());
}
