//! Numeric artifact codecs and key layout.
//!
//! The feature and similarity blobs for a video are stored as
//! gzip-compressed JSON. They are opaque to every component except the
//! producer/consumer pair that owns them.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use vlabel_models::{ProjectId, VideoId};

use crate::error::{StorageError, StorageResult};

/// Content type used for gzip-compressed JSON artifacts.
pub const CONTENT_TYPE_GZIP: &str = "application/gzip";

/// Key of a video's raw bytes: `{project_id}/{video_id}/raw`.
pub fn raw_video_key(project_id: &ProjectId, video_id: &VideoId) -> String {
    format!("{}/{}/raw", project_id, video_id)
}

/// Key of one frame image: `{project_id}/{video_id}/frames/{index:06}.jpg`.
pub fn frame_key(project_id: &ProjectId, video_id: &VideoId, sequence_index: u32) -> String {
    format!("{}/{}/frames/{:06}.jpg", project_id, video_id, sequence_index)
}

/// Key of the per-frame feature artifact.
pub fn features_key(project_id: &ProjectId, video_id: &VideoId) -> String {
    format!("{}/{}/features.json.gz", project_id, video_id)
}

/// Key of the frame similarity artifact.
pub fn similarity_key(project_id: &ProjectId, video_id: &VideoId) -> String {
    format!("{}/{}/similarity.json.gz", project_id, video_id)
}

/// Serialize a value to gzip-compressed JSON bytes ready for upload.
pub fn encode_artifact<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    let json = serde_json::to_string(value)
        .map_err(|e| StorageError::Serialization(format!("Failed to serialize artifact: {}", e)))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(json.as_bytes())
        .map_err(|e| StorageError::Serialization(format!("Failed to gzip artifact: {}", e)))?;

    encoder
        .finish()
        .map_err(|e| StorageError::Serialization(format!("Failed to finish gzip encoding: {}", e)))
}

/// Decompress gzip JSON bytes back into a value.
pub fn decode_artifact<T: DeserializeOwned>(data: &[u8]) -> StorageResult<T> {
    let mut decoder = GzDecoder::new(data);
    let mut json = String::new();
    decoder
        .read_to_string(&mut json)
        .map_err(|e| StorageError::Serialization(format!("Failed to decompress artifact: {}", e)))?;

    serde_json::from_str(&json)
        .map_err(|e| StorageError::Serialization(format!("Failed to deserialize artifact: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        dim: usize,
        vectors: Vec<Vec<f32>>,
    }

    #[test]
    fn test_artifact_roundtrip() {
        let blob = Blob {
            dim: 2,
            vectors: vec![vec![0.0, 1.0], vec![0.5, 0.25]],
        };

        let bytes = encode_artifact(&blob).unwrap();
        let decoded: Blob = decode_artifact(&bytes).unwrap();
        assert_eq!(decoded, blob);
    }

    #[test]
    fn test_key_layout() {
        let project = ProjectId::from("p1");
        let video = VideoId::from("v1");
        assert_eq!(frame_key(&project, &video, 7), "p1/v1/frames/000007.jpg");
        assert_eq!(features_key(&project, &video), "p1/v1/features.json.gz");
        assert_eq!(similarity_key(&project, &video), "p1/v1/similarity.json.gz");
    }
}
