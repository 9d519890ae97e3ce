//! Annotation export.
//!
//! Renders a project's labeled boxes into one of the supported dataset
//! formats and writes the resulting files to the media store under the
//! project's export prefix. Output is deterministic: labels are ordered
//! by name, videos by name, frames by sequence index and boxes by id, so
//! exporting the same project twice yields byte-identical files.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use vlabel_models::{BoundingBox, ExportFormat, Frame, Label, Project, ProjectId, Video};
use vlabel_store::Datastore;
use vlabel_storage::MediaStore;

use crate::error::{WorkerError, WorkerResult};

/// One rendered export file, relative to the export prefix.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Renders and stores project exports.
pub struct Exporter {
    store: Arc<dyn Datastore>,
    media: Arc<dyn MediaStore>,
}

/// Deterministic snapshot of everything an export needs.
struct Snapshot {
    labels: Vec<Label>,
    /// (video, its frames in sequence order, labeled boxes per frame)
    videos: Vec<(Video, Vec<(Frame, Vec<BoundingBox>)>)>,
}

impl Exporter {
    pub fn new(store: Arc<dyn Datastore>, media: Arc<dyn MediaStore>) -> Self {
        Self { store, media }
    }

    /// Export a project's annotations in `format`. Returns the media store
    /// prefix the files were written under.
    pub async fn export_project(
        &self,
        project_id: &ProjectId,
        format: ExportFormat,
    ) -> WorkerResult<String> {
        let project = self.store.get_project(project_id).await?;
        let snapshot = self.snapshot(&project).await?;

        let files = match format {
            ExportFormat::Coco => render_coco(&snapshot)?,
            ExportFormat::Yolo => render_yolo(&snapshot)?,
            ExportFormat::PascalVoc => render_pascal_voc(&snapshot)?,
            ExportFormat::Albumentations => render_albumentations(&snapshot)?,
        };

        let prefix = format!("{}/exports/{}/", project.id, format);
        for file in &files {
            let key = format!("{}{}", prefix, file.path);
            self.media
                .put(&key, file.bytes.clone(), content_type(format))
                .await?;
        }

        info!(
            project_id = %project.id,
            %format,
            files = files.len(),
            "Export complete"
        );
        Ok(prefix)
    }

    /// Render a project's annotations without storing them.
    pub async fn render_project(
        &self,
        project_id: &ProjectId,
        format: ExportFormat,
    ) -> WorkerResult<Vec<ExportFile>> {
        let project = self.store.get_project(project_id).await?;
        let snapshot = self.snapshot(&project).await?;
        match format {
            ExportFormat::Coco => render_coco(&snapshot),
            ExportFormat::Yolo => render_yolo(&snapshot),
            ExportFormat::PascalVoc => render_pascal_voc(&snapshot),
            ExportFormat::Albumentations => render_albumentations(&snapshot),
        }
    }

    async fn snapshot(&self, project: &Project) -> WorkerResult<Snapshot> {
        let mut labels = self.store.get_labels_by_project(&project.id).await?;
        labels.sort_by(|a, b| a.name.cmp(&b.name));

        let mut videos = self.store.list_videos_by_project(&project.id).await?;
        videos.sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = Vec::with_capacity(videos.len());
        for video in videos {
            let frames = self.store.get_frames_by_video(&video.id).await?;
            let mut with_boxes = Vec::with_capacity(frames.len());
            for frame in frames {
                let boxes = self
                    .store
                    .get_boxes_by_frame(&frame.id)
                    .await?
                    .into_iter()
                    .filter(|b| {
                        if b.label_id.is_none() {
                            warn!(box_id = %b.id, "Skipping unlabeled box in export");
                            return false;
                        }
                        true
                    })
                    .collect();
                with_boxes.push((frame, boxes));
            }
            out.push((video, with_boxes));
        }

        Ok(Snapshot {
            labels,
            videos: out,
        })
    }
}

fn content_type(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Coco | ExportFormat::Albumentations => "application/json",
        ExportFormat::Yolo => "text/plain",
        ExportFormat::PascalVoc => "application/xml",
    }
}

/// Logical image name of a frame inside an export: `{video}/{seq:06}.jpg`.
fn image_name(video: &Video, frame: &Frame) -> String {
    format!("{}/{:06}.jpg", video.name, frame.sequence_index)
}

fn stem(video: &Video, frame: &Frame) -> String {
    format!("{}/{:06}", video.name, frame.sequence_index)
}

fn label_name<'a>(labels: &'a [Label], b: &BoundingBox) -> WorkerResult<&'a str> {
    let Some(label_id) = b.label_id.as_ref() else {
        return Err(WorkerError::export_failed(format!(
            "box {} has no label",
            b.id
        )));
    };
    labels
        .iter()
        .find(|l| &l.id == label_id)
        .map(|l| l.name.as_str())
        .ok_or_else(|| WorkerError::export_failed(format!("label {} not found", label_id)))
}

// ---- COCO ----

#[derive(Serialize)]
struct CocoDataset {
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Serialize)]
struct CocoImage {
    id: u64,
    file_name: String,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: u64,
    /// `[x_min, y_min, width, height]` in pixels
    bbox: [f64; 4],
    area: f64,
    iscrowd: u8,
}

#[derive(Serialize)]
struct CocoCategory {
    id: u64,
    name: String,
}

fn render_coco(snapshot: &Snapshot) -> WorkerResult<Vec<ExportFile>> {
    let category_ids: HashMap<&str, u64> = snapshot
        .labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.name.as_str(), i as u64 + 1))
        .collect();

    let mut images = Vec::new();
    let mut annotations = Vec::new();
    let mut image_id = 0u64;
    let mut annotation_id = 0u64;

    for (video, frames) in &snapshot.videos {
        for (frame, boxes) in frames {
            image_id += 1;
            images.push(CocoImage {
                id: image_id,
                file_name: image_name(video, frame),
                width: frame.width,
                height: frame.height,
            });

            for b in boxes {
                let name = label_name(&snapshot.labels, b)?;
                annotation_id += 1;
                annotations.push(CocoAnnotation {
                    id: annotation_id,
                    image_id,
                    category_id: category_ids[name],
                    bbox: [
                        b.geometry.x_min,
                        b.geometry.y_min,
                        b.geometry.width,
                        b.geometry.height,
                    ],
                    area: b.geometry.width * b.geometry.height,
                    iscrowd: 0,
                });
            }
        }
    }

    let categories = snapshot
        .labels
        .iter()
        .map(|l| CocoCategory {
            id: category_ids[l.name.as_str()],
            name: l.name.clone(),
        })
        .collect();

    let dataset = CocoDataset {
        images,
        annotations,
        categories,
    };
    Ok(vec![ExportFile {
        path: "annotations.json".to_string(),
        bytes: serde_json::to_vec_pretty(&dataset)
            .map_err(|e| WorkerError::export_failed(e.to_string()))?,
    }])
}

// ---- YOLO ----

fn render_yolo(snapshot: &Snapshot) -> WorkerResult<Vec<ExportFile>> {
    let class_ids: HashMap<&str, usize> = snapshot
        .labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.name.as_str(), i))
        .collect();

    let mut files = Vec::new();

    let classes = snapshot
        .labels
        .iter()
        .map(|l| l.name.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    files.push(ExportFile {
        path: "classes.txt".to_string(),
        bytes: format!("{}\n", classes).into_bytes(),
    });

    for (video, frames) in &snapshot.videos {
        for (frame, boxes) in frames {
            let mut lines = String::new();
            for b in boxes {
                let name = label_name(&snapshot.labels, b)?;
                let (cx, cy) = b.geometry.center();
                let w = frame.width as f64;
                let h = frame.height as f64;
                lines.push_str(&format!(
                    "{} {:.6} {:.6} {:.6} {:.6}\n",
                    class_ids[name],
                    clamp01(cx / w),
                    clamp01(cy / h),
                    clamp01(b.geometry.width / w),
                    clamp01(b.geometry.height / h),
                ));
            }
            files.push(ExportFile {
                path: format!("{}.txt", stem(video, frame)),
                bytes: lines.into_bytes(),
            });
        }
    }

    Ok(files)
}

// ---- Pascal VOC ----

fn render_pascal_voc(snapshot: &Snapshot) -> WorkerResult<Vec<ExportFile>> {
    let mut files = Vec::new();

    for (video, frames) in &snapshot.videos {
        for (frame, boxes) in frames {
            let mut objects = String::new();
            for b in boxes {
                let name = label_name(&snapshot.labels, b)?;
                objects.push_str(&format!(
                    "  <object>\n    <name>{}</name>\n    <bndbox>\n      <xmin>{}</xmin>\n      <ymin>{}</ymin>\n      <xmax>{}</xmax>\n      <ymax>{}</ymax>\n    </bndbox>\n  </object>\n",
                    xml_escape(name),
                    b.geometry.x_min,
                    b.geometry.y_min,
                    b.geometry.x_max,
                    b.geometry.y_max,
                ));
            }

            let xml = format!(
                "<annotation>\n  <folder>{}</folder>\n  <filename>{:06}.jpg</filename>\n  <size>\n    <width>{}</width>\n    <height>{}</height>\n    <depth>3</depth>\n  </size>\n{}</annotation>\n",
                xml_escape(&video.name),
                frame.sequence_index,
                frame.width,
                frame.height,
                objects,
            );
            files.push(ExportFile {
                path: format!("{}.xml", stem(video, frame)),
                bytes: xml.into_bytes(),
            });
        }
    }

    Ok(files)
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ---- Albumentations ----

#[derive(Serialize)]
struct AlbumentationsImage {
    image: String,
    width: u32,
    height: u32,
    /// Normalized `[x_min, y_min, x_max, y_max]` per box
    bboxes: Vec<[f64; 4]>,
    labels: Vec<String>,
}

fn render_albumentations(snapshot: &Snapshot) -> WorkerResult<Vec<ExportFile>> {
    let mut images = Vec::new();

    for (video, frames) in &snapshot.videos {
        for (frame, boxes) in frames {
            let mut bboxes = Vec::with_capacity(boxes.len());
            let mut labels = Vec::with_capacity(boxes.len());
            for b in boxes {
                let w = frame.width as f64;
                let h = frame.height as f64;
                bboxes.push([
                    clamp01(b.geometry.x_min / w),
                    clamp01(b.geometry.y_min / h),
                    clamp01(b.geometry.x_max / w),
                    clamp01(b.geometry.y_max / h),
                ]);
                labels.push(label_name(&snapshot.labels, b)?.to_string());
            }
            images.push(AlbumentationsImage {
                image: image_name(video, frame),
                width: frame.width,
                height: frame.height,
                bboxes,
                labels,
            });
        }
    }

    Ok(vec![ExportFile {
        path: "annotations.json".to_string(),
        bytes: serde_json::to_vec_pretty(&images)
            .map_err(|e| WorkerError::export_failed(e.to_string()))?,
    }])
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}
