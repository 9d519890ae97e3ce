//! Export rendering tests.

use std::sync::Arc;

use serde_json::Value;

use vlabel_models::{
    BoundingBox, BoxGeometry, ExportFormat, Frame, Project, ProjectId, Video, VideoId,
};
use vlabel_storage::{MediaStore, MemoryMediaStore};
use vlabel_store::{Datastore, MemoryStore};
use vlabel_worker::Exporter;

struct Fixture {
    store: Arc<MemoryStore>,
    media: Arc<MemoryMediaStore>,
    exporter: Exporter,
    project_id: ProjectId,
    video_id: VideoId,
}

/// One video, two 100x100 frames. Frame 0 carries a human "cat" box,
/// frame 1 a predicted "dog" box. Labels are created in reverse
/// alphabetical order to exercise the name sort.
async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMediaStore::new());

    let project = store
        .create_project(Project::new("wildlife", 1.0))
        .await
        .unwrap();
    let video = store
        .create_video(Video::new(project.id.clone(), "beach", "raw-key", 64))
        .await
        .unwrap();

    let frame0 = Frame::new(project.id.clone(), video.id.clone(), 0, "f0", 100, 100);
    let frame1 = Frame::new(project.id.clone(), video.id.clone(), 1, "f1", 100, 100);
    store
        .insert_frames(vec![frame0.clone(), frame1.clone()])
        .await
        .unwrap();

    let dog = store.get_or_create_label(&project.id, "dog").await.unwrap();
    let cat = store.get_or_create_label(&project.id, "cat").await.unwrap();

    let cat_box = BoundingBox::human(
        frame0.id.clone(),
        Some(cat.id),
        BoxGeometry::from_corners(10.0, 20.0, 60.0, 80.0),
    );
    let dog_box = BoundingBox::prediction(
        frame1.id.clone(),
        Some(dog.id),
        BoxGeometry::from_corners(0.0, 0.0, 50.0, 100.0),
        0.8,
    );
    store.insert_boxes(vec![cat_box, dog_box]).await.unwrap();

    Fixture {
        exporter: Exporter::new(store.clone(), media.clone()),
        project_id: project.id,
        video_id: video.id,
        store,
        media,
    }
}

#[tokio::test]
async fn test_coco_export_structure() {
    let fx = fixture().await;
    let files = fx
        .exporter
        .render_project(&fx.project_id, ExportFormat::Coco)
        .await
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "annotations.json");

    let dataset: Value = serde_json::from_slice(&files[0].bytes).unwrap();

    // Categories sorted by name with 1-based ids.
    let categories = dataset["categories"].as_array().unwrap();
    assert_eq!(categories[0]["name"], "cat");
    assert_eq!(categories[0]["id"], 1);
    assert_eq!(categories[1]["name"], "dog");
    assert_eq!(categories[1]["id"], 2);

    let images = dataset["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0]["file_name"], "beach/000000.jpg");
    assert_eq!(images[0]["width"], 100);

    let annotations = dataset["annotations"].as_array().unwrap();
    assert_eq!(annotations.len(), 2);
    // bbox is [x_min, y_min, width, height].
    assert_eq!(
        annotations[0]["bbox"].as_array().unwrap(),
        &vec![Value::from(10.0), 20.0.into(), 50.0.into(), 60.0.into()]
    );
    assert_eq!(annotations[0]["category_id"], 1);
    assert_eq!(annotations[0]["area"], 3000.0);
}

#[tokio::test]
async fn test_yolo_export_normalizes_center_coordinates() {
    let fx = fixture().await;
    let files = fx
        .exporter
        .render_project(&fx.project_id, ExportFormat::Yolo)
        .await
        .unwrap();

    let classes = files.iter().find(|f| f.path == "classes.txt").unwrap();
    assert_eq!(String::from_utf8_lossy(&classes.bytes), "cat\ndog\n");

    let frame0 = files
        .iter()
        .find(|f| f.path == "beach/000000.txt")
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&frame0.bytes),
        "0 0.350000 0.500000 0.500000 0.600000\n"
    );

    let frame1 = files
        .iter()
        .find(|f| f.path == "beach/000001.txt")
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&frame1.bytes),
        "1 0.250000 0.500000 0.500000 1.000000\n"
    );
}

#[tokio::test]
async fn test_pascal_voc_export_emits_one_xml_per_frame() {
    let fx = fixture().await;
    let files = fx
        .exporter
        .render_project(&fx.project_id, ExportFormat::PascalVoc)
        .await
        .unwrap();
    assert_eq!(files.len(), 2);

    let xml = String::from_utf8_lossy(
        &files
            .iter()
            .find(|f| f.path == "beach/000000.xml")
            .unwrap()
            .bytes,
    )
    .into_owned();
    assert!(xml.contains("<filename>000000.jpg</filename>"));
    assert!(xml.contains("<width>100</width>"));
    assert!(xml.contains("<name>cat</name>"));
    assert!(xml.contains("<xmin>10</xmin>"));
    assert!(xml.contains("<ymax>80</ymax>"));
}

#[tokio::test]
async fn test_albumentations_export_normalizes_corners() {
    let fx = fixture().await;
    let files = fx
        .exporter
        .render_project(&fx.project_id, ExportFormat::Albumentations)
        .await
        .unwrap();
    assert_eq!(files.len(), 1);

    let images: Value = serde_json::from_slice(&files[0].bytes).unwrap();
    let first = &images.as_array().unwrap()[0];
    assert_eq!(first["image"], "beach/000000.jpg");
    assert_eq!(
        first["bboxes"][0].as_array().unwrap(),
        &vec![Value::from(0.1), 0.2.into(), 0.6.into(), 0.8.into()]
    );
    assert_eq!(first["labels"][0], "cat");
}

#[tokio::test]
async fn test_export_is_deterministic() {
    let fx = fixture().await;
    let first = fx
        .exporter
        .render_project(&fx.project_id, ExportFormat::Coco)
        .await
        .unwrap();
    let second = fx
        .exporter
        .render_project(&fx.project_id, ExportFormat::Coco)
        .await
        .unwrap();
    assert_eq!(first[0].bytes, second[0].bytes);
}

#[tokio::test]
async fn test_export_project_writes_files_under_export_prefix() {
    let fx = fixture().await;
    let prefix = fx
        .exporter
        .export_project(&fx.project_id, ExportFormat::Yolo)
        .await
        .unwrap();

    assert_eq!(prefix, format!("{}/exports/yolo/", fx.project_id));
    assert!(fx
        .media
        .exists(&format!("{}classes.txt", prefix))
        .await
        .unwrap());
    assert!(fx
        .media
        .exists(&format!("{}beach/000000.txt", prefix))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unlabeled_boxes_are_skipped() {
    let fx = fixture().await;
    let frames = fx.store.get_frames_by_video(&fx.video_id).await.unwrap();
    let unlabeled = BoundingBox::human(
        frames[0].id.clone(),
        None,
        BoxGeometry::from_corners(1.0, 1.0, 2.0, 2.0),
    );
    fx.store.insert_boxes(vec![unlabeled]).await.unwrap();

    let files = fx
        .exporter
        .render_project(&fx.project_id, ExportFormat::Coco)
        .await
        .unwrap();
    let dataset: Value = serde_json::from_slice(&files[0].bytes).unwrap();
    assert_eq!(dataset["annotations"].as_array().unwrap().len(), 2);
}
