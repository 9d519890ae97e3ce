//! Media store client for the VLabel backend.
//!
//! This crate provides:
//! - The `MediaStore` capability trait (put/get/delete of opaque objects)
//! - An S3-compatible client implementation
//! - An in-memory store for tests and single-node development
//! - Gzip-compressed JSON codecs for the numeric artifacts
//!   (per-frame features, frame similarity structure)

pub mod artifact;
pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use artifact::{
    decode_artifact, encode_artifact, features_key, frame_key, raw_video_key, similarity_key,
    CONTENT_TYPE_GZIP,
};
pub use client::{S3Config, S3Store};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryMediaStore;
pub use store::MediaStore;
