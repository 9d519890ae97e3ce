//! Frame extraction.
//!
//! Decodes a video into an ordered, gap-free sequence of JPEG frames at a
//! target sampling rate. The decoder occasionally emits one frame more than
//! `ceil(duration × rate)` at segment boundaries; the surplus is truncated
//! so the sequence length is exact. A shortfall means the input could not
//! be decoded in full and fails the extraction.

use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// One extracted frame on local disk, ready for upload.
#[derive(Debug, Clone)]
pub struct ExtractedFrame {
    /// Position in the sampled sequence (0-based, gap-free)
    pub sequence_index: u32,
    /// Local path of the JPEG image
    pub path: PathBuf,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

/// Number of frames a video of `duration` seconds yields at `rate` fps.
pub fn expected_frame_count(duration: f64, rate: f64) -> u32 {
    (duration * rate).ceil() as u32
}

/// Extract frames from `video_path` at `rate` frames/second into `out_dir`.
///
/// Returns exactly `ceil(duration × rate)` frames ordered by sequence
/// index. Fails with `MediaError::Decode` on unreadable or non-video
/// input, before writing anything.
pub async fn extract_frames(
    video_path: impl AsRef<Path>,
    rate: f64,
    out_dir: impl AsRef<Path>,
    cancel_rx: Option<watch::Receiver<bool>>,
) -> MediaResult<Vec<ExtractedFrame>> {
    let video_path = video_path.as_ref();
    let out_dir = out_dir.as_ref();

    if rate <= 0.0 {
        return Err(MediaError::decode(format!(
            "invalid extraction rate: {}",
            rate
        )));
    }

    // Rejects non-video input up front, with no frames written.
    let info = probe_video(video_path).await?;
    let expected = expected_frame_count(info.duration, rate);
    debug!(
        duration = info.duration,
        rate, expected, "Extracting frames"
    );

    tokio::fs::create_dir_all(out_dir).await?;

    let pattern = out_dir.join("%06d.jpg");
    let cmd = FfmpegCommand::new(video_path, &pattern)
        .sample_fps(rate)
        .image_sequence()
        .jpeg_quality(2);

    let mut runner = FfmpegRunner::new();
    if let Some(rx) = cancel_rx {
        runner = runner.with_cancel(rx);
    }
    runner.run(&cmd).await.map_err(|e| match e {
        // A failed decode of an already-probed file still counts as
        // unreadable media for the caller.
        MediaError::FfmpegFailed { stderr, .. } => MediaError::decode(format!(
            "ffmpeg failed to decode input: {}",
            stderr.unwrap_or_default().trim()
        )),
        other => other,
    })?;

    let mut frames = Vec::with_capacity(expected as usize);
    for index in 0..expected {
        let path = out_dir.join(format!("{:06}.jpg", index));
        if !path.exists() {
            return Err(MediaError::decode(format!(
                "decoder produced {} of {} expected frames",
                index, expected
            )));
        }
        frames.push(ExtractedFrame {
            sequence_index: index,
            path,
            width: info.width,
            height: info.height,
        });
    }

    // Drop decoder surplus beyond the expected count.
    let mut surplus = expected;
    loop {
        let extra = out_dir.join(format!("{:06}.jpg", surplus));
        if !extra.exists() {
            break;
        }
        tokio::fs::remove_file(&extra).await?;
        surplus += 1;
    }

    info!(
        video = %video_path.display(),
        frames = frames.len(),
        "Frame extraction complete"
    );
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_frame_count() {
        assert_eq!(expected_frame_count(64.0, 1.0), 64);
        assert_eq!(expected_frame_count(10.5, 2.0), 21);
        assert_eq!(expected_frame_count(10.1, 1.0), 11);
        assert_eq!(expected_frame_count(0.4, 1.0), 1);
    }

    #[tokio::test]
    async fn test_extract_rejects_bad_rate() {
        let err = extract_frames("in.mp4", 0.0, "/tmp/out", None)
            .await
            .unwrap_err();
        assert!(err.is_decode_failure());
    }
}
