//! Audio duration lookup through `ffprobe`.
//!
//! Only the duration fields are requested (`-show_entries`), so the JSON
//! stays small even for long recordings.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::frame_budget::DurationProbe;

#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("media file not found: {0}")]
    MediaNotFound(String),
}

/// The parts of ffprobe's JSON report that carry a duration.
#[derive(Debug, Default, Deserialize)]
pub struct DurationReport {
    #[serde(default)]
    pub format: Option<ContainerInfo>,
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerInfo {
    pub duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamInfo {
    pub codec_type: Option<String>,
    pub duration: Option<String>,
}

impl DurationReport {
    /// Container duration in seconds, else the first audio stream's.
    /// `None` unless one of them is a positive finite number; ffprobe
    /// writes `N/A` for unknown values.
    pub fn seconds(&self) -> Option<f64> {
        let positive = |raw: Option<&str>| {
            raw.and_then(|d| d.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs > 0.0)
        };

        let container = self
            .format
            .as_ref()
            .and_then(|f| positive(f.duration.as_deref()));
        container.or_else(|| {
            self.streams
                .iter()
                .find(|s| s.codec_type.as_deref() == Some("audio"))
                .and_then(|s| positive(s.duration.as_deref()))
        })
    }
}

/// Run ffprobe on `path` and parse its duration report.
pub async fn probe_durations(path: &Path) -> Result<DurationReport, FfmpegError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(FfmpegError::MediaNotFound(path.display().to_string()));
    }

    let output = tokio::process::Command::new("ffprobe")
        .args(["-v", "error", "-of", "json"])
        .args(["-show_entries", "format=duration:stream=codec_type,duration"])
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|e| {
        FfmpegError::ParseError(format!("{e}: {}", String::from_utf8_lossy(&output.stdout)))
    })
}

/// [`DurationProbe`] backed by the `ffprobe` binary on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfprobeDuration;

#[async_trait]
impl DurationProbe for FfprobeDuration {
    async fn duration_secs(&self, path: &Path) -> Result<f64, FfmpegError> {
        probe_durations(path).await?.seconds().ok_or_else(|| {
            FfmpegError::ParseError(format!("no duration reported for {}", path.display()))
        })
    }
}
