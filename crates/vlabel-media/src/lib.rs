//! FFmpeg CLI wrapper for the VLabel frame extractor.
//!
//! This crate provides:
//! - An FFmpeg command builder and runner with cancellation and timeout
//! - FFprobe metadata for uploaded videos
//! - Frame extraction at a configurable sampling rate

pub mod command;
pub mod error;
pub mod extract;
pub mod probe;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use extract::{expected_frame_count, extract_frames, ExtractedFrame};
pub use probe::{probe_video, VideoInfo};
