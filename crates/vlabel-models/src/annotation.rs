//! Bounding boxes, labels and detection candidates.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{BoxId, FrameId, LabelId, ProjectId};

/// Geometry validation failure. Submitting a batch containing an invalid
/// geometry rejects the whole batch.
#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("invalid corners: x_min {x_min} must be < x_max {x_max}")]
    InvalidXOrder { x_min: f64, x_max: f64 },

    #[error("invalid corners: y_min {y_min} must be < y_max {y_max}")]
    InvalidYOrder { y_min: f64, y_max: f64 },

    #[error("width {width} does not match x_max - x_min = {expected}")]
    WidthMismatch { width: f64, expected: f64 },

    #[error("height {height} does not match y_max - y_min = {expected}")]
    HeightMismatch { height: f64, expected: f64 },
}

/// Axis-aligned box geometry in pixel coordinates.
///
/// Both the corner representation (`x_min`..`y_max`) and the size
/// representation (`width`/`height`) are stored and must stay consistent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoxGeometry {
    /// X coordinate of the top-left corner
    pub x_min: f64,
    /// Y coordinate of the top-left corner
    pub y_min: f64,
    /// X coordinate of the bottom-right corner
    pub x_max: f64,
    /// Y coordinate of the bottom-right corner
    pub y_max: f64,
    /// Box width (must equal `x_max - x_min`)
    pub width: f64,
    /// Box height (must equal `y_max - y_min`)
    pub height: f64,
}

/// Tolerance for the redundant width/height fields. Covers float round-trips
/// through JSON without accepting genuinely inconsistent submissions.
const GEOMETRY_EPSILON: f64 = 1e-6;

impl BoxGeometry {
    /// Build a geometry from corner coordinates, deriving width and height.
    pub fn from_corners(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            width: x_max - x_min,
            height: y_max - y_min,
        }
    }

    /// Validate corner ordering and representation consistency.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.x_min >= self.x_max {
            return Err(GeometryError::InvalidXOrder {
                x_min: self.x_min,
                x_max: self.x_max,
            });
        }
        if self.y_min >= self.y_max {
            return Err(GeometryError::InvalidYOrder {
                y_min: self.y_min,
                y_max: self.y_max,
            });
        }
        let expected_width = self.x_max - self.x_min;
        if (self.width - expected_width).abs() > GEOMETRY_EPSILON {
            return Err(GeometryError::WidthMismatch {
                width: self.width,
                expected: expected_width,
            });
        }
        let expected_height = self.y_max - self.y_min;
        if (self.height - expected_height).abs() > GEOMETRY_EPSILON {
            return Err(GeometryError::HeightMismatch {
                height: self.height,
                expected: expected_height,
            });
        }
        Ok(())
    }

    /// Center point of the box.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x_min + self.width / 2.0,
            self.y_min + self.height / 2.0,
        )
    }
}

/// A rectangular region on a frame with an associated label.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    /// Unique box ID
    pub id: BoxId,

    /// Owning frame
    pub frame_id: FrameId,

    /// Assigned label, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_id: Option<LabelId>,

    /// Box geometry (both representations kept consistent)
    pub geometry: BoxGeometry,

    /// True for machine-generated, unconfirmed boxes; false once a human
    /// has confirmed (or created) the box. Human boxes are never overwritten
    /// by re-inference.
    pub prediction: bool,

    /// Confidence score from the detector (predictions only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// Embedded image-feature vector of the box crop, used as a correction
    /// signal during re-inference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_features: Option<Vec<f32>>,
}

impl BoundingBox {
    /// Create a machine prediction box.
    pub fn prediction(
        frame_id: FrameId,
        label_id: Option<LabelId>,
        geometry: BoxGeometry,
        confidence: f32,
    ) -> Self {
        Self {
            id: BoxId::new(),
            frame_id,
            label_id,
            geometry,
            prediction: true,
            confidence: Some(confidence),
            image_features: None,
        }
    }

    /// Create a human-confirmed box.
    pub fn human(frame_id: FrameId, label_id: Option<LabelId>, geometry: BoxGeometry) -> Self {
        Self {
            id: BoxId::new(),
            frame_id,
            label_id,
            geometry,
            prediction: false,
            confidence: None,
            image_features: None,
        }
    }
}

/// A label (object class) within a project.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Label {
    /// Unique label ID
    pub id: LabelId,

    /// Owning project
    pub project_id: ProjectId,

    /// Class name (unique within the project)
    pub name: String,
}

impl Label {
    /// Create a new label.
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id: LabelId::new(),
            project_id,
            name: name.into(),
        }
    }
}

/// A detection candidate produced by an object-detection backend, before
/// it has been materialized as a `BoundingBox` row.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BoxCandidate {
    /// Detected class name (mapped to or created as a project `Label`)
    pub label_name: String,
    /// Candidate geometry
    pub geometry: BoxGeometry,
    /// Detector confidence in [0, 1]
    pub confidence: f32,
}
