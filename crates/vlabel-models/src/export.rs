//! Annotation export formats.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Requested export format is not supported.
#[derive(Debug, Error, PartialEq)]
#[error("unsupported export format: {0}")]
pub struct UnsupportedFormatError(pub String);

/// Bounding-box serialization format for project exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// COCO object-detection JSON (single file)
    #[default]
    Coco,
    /// YOLO: one normalized-coordinates text file per frame
    Yolo,
    /// Pascal VOC: one XML file per frame
    PascalVoc,
    /// Albumentations: normalized `[x_min, y_min, x_max, y_max]` JSON
    Albumentations,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Coco => "coco",
            ExportFormat::Yolo => "yolo",
            ExportFormat::PascalVoc => "pascal_voc",
            ExportFormat::Albumentations => "albumentations",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = UnsupportedFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coco" => Ok(ExportFormat::Coco),
            "yolo" => Ok(ExportFormat::Yolo),
            "pascal_voc" | "voc" => Ok(ExportFormat::PascalVoc),
            "albumentations" => Ok(ExportFormat::Albumentations),
            other => Err(UnsupportedFormatError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("coco".parse::<ExportFormat>().unwrap(), ExportFormat::Coco);
        assert_eq!(
            "pascal_voc".parse::<ExportFormat>().unwrap(),
            ExportFormat::PascalVoc
        );
        assert!("tfrecord".parse::<ExportFormat>().is_err());
    }
}
