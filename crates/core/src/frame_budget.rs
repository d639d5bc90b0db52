//! Frame budget estimation from audio track durations.
//!
//! The generated clip must cover the longest audio track, plus a fixed
//! tail of padding frames the backend consumes for its trailing context.

use std::path::Path;

use async_trait::async_trait;

use crate::ffmpeg::FfmpegError;

/// Output frame rate the backend renders at.
pub const DEFAULT_FPS: u32 = 25;

/// Trailing padding frames added to every budget. Also the budget used
/// when no track duration could be read.
pub const PADDING_FRAMES: u32 = 81;

/// Reads the duration of a media file in seconds.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration_secs(&self, path: &Path) -> Result<f64, FfmpegError>;
}

/// Compute a frame budget from already-measured durations.
///
/// `None` entries are tracks whose duration could not be read; they are
/// skipped. With no usable duration the result is [`PADDING_FRAMES`].
pub fn frame_budget_from_durations(durations: &[Option<f64>], fps: u32) -> u32 {
    let longest = durations
        .iter()
        .flatten()
        .copied()
        .filter(|d| d.is_finite() && *d > 0.0)
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));

    match longest {
        Some(secs) => (secs * f64::from(fps)).floor() as u32 + PADDING_FRAMES,
        None => PADDING_FRAMES,
    }
}

/// Estimate a frame budget for one or two audio tracks.
///
/// A track whose duration cannot be read is logged and excluded; this
/// never fails.
pub async fn estimate_frame_budget(
    probe: &dyn DurationProbe,
    primary: &Path,
    secondary: Option<&Path>,
    fps: u32,
) -> u32 {
    let mut durations = Vec::with_capacity(2);

    for path in std::iter::once(primary).chain(secondary) {
        match probe.duration_secs(path).await {
            Ok(secs) => {
                tracing::debug!(path = %path.display(), secs, "Audio duration measured");
                durations.push(Some(secs));
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not read audio duration, excluding track",
                );
                durations.push(None);
            }
        }
    }

    let frames = frame_budget_from_durations(&durations, fps);
    tracing::info!(frames, fps, "Estimated frame budget from audio");
    frames
}
