//! Preprocessing and annotation worker.
//!
//! Runs the video pipeline (frame extraction, feature embedding,
//! similarity indexing, detection seeding), serves the human review loop
//! and renders annotation exports.

pub mod config;
pub mod error;
pub mod export;
pub mod inference;
pub mod locks;
pub mod pipeline;
pub mod review;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use export::{ExportFile, Exporter};
pub use inference::{retrain_and_reinfer, seed_inference};
pub use locks::VideoLocks;
pub use pipeline::{
    preprocess_video, FfmpegFrameSource, FrameSource, PipelineContext, PipelineService,
};
pub use review::{ReviewCoordinator, ReviewPolicy};
