//! Shared data models for the VLabel annotation backend.
//!
//! This crate provides Serde-serializable types for:
//! - Projects, videos and their preprocessing lifecycle
//! - Frames extracted from videos
//! - Bounding boxes and labels
//! - Annotation export formats

pub mod annotation;
pub mod export;
pub mod frame;
pub mod ids;
pub mod project;
pub mod video;

// Re-export common types
pub use annotation::{BoundingBox, BoxCandidate, BoxGeometry, GeometryError, Label};
pub use export::{ExportFormat, UnsupportedFormatError};
pub use frame::Frame;
pub use ids::{BoxId, FrameId, LabelId, ProjectId, VideoId};
pub use project::Project;
pub use video::{PreprocessStatus, Video};
