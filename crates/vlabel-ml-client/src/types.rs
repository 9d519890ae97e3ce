//! ML service request/response types.

use serde::{Deserialize, Serialize};
use vlabel_models::{BoxCandidate, BoxGeometry};

/// A human-confirmed box forwarded to the backend as a fine-tuning signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    /// Confirmed class name
    pub label_name: String,
    /// Confirmed geometry
    pub geometry: BoxGeometry,
    /// Embedded image features of the box crop, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_features: Option<Vec<f32>>,
}

/// Response from the `/embed` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    /// Fixed-length feature vector for the submitted image
    pub vector: Vec<f32>,
}

/// One detection returned by `/detect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Detected class name
    pub label: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Detection {
    /// Convert into the shared candidate model.
    pub fn into_candidate(self) -> BoxCandidate {
        BoxCandidate {
            label_name: self.label,
            geometry: BoxGeometry::from_corners(self.x_min, self.y_min, self.x_max, self.y_max),
            confidence: self.confidence,
        }
    }
}

/// Response from the `/detect` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub detections: Vec<Detection>,
}

/// Request body for `/fine_tune`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuneRequest {
    pub corrections: Vec<Correction>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}
