//! Single-video and batch flows built on [`RunpodClient`].

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use talkgen_core::types::{
    ActorCount, MediaKind, DEFAULT_HEIGHT, DEFAULT_PROMPT, DEFAULT_WIDTH,
};

use crate::error::ClientError;
use crate::runpod::{save_video_result, JobOutcome, PollSettings, RunpodClient};

/// Key prefix for uploaded inputs.
const INPUT_KEY_PREFIX: &str = "input/infinitetalk";

/// Audio extensions picked up by batch processing.
pub const AUDIO_EXTENSIONS: [&str; 4] = ["wav", "mp3", "m4a", "flac"];

/// Rendering options shared by every job of a flow.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub input_type: MediaKind,
    pub person_count: ActorCount,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub max_frame: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            input_type: MediaKind::Image,
            person_count: ActorCount::Single,
            prompt: DEFAULT_PROMPT.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            max_frame: None,
        }
    }
}

/// Local files for one video.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub media_path: PathBuf,
    pub audio_path: PathBuf,
    /// Used only when `options.person_count` is multi.
    pub secondary_audio_path: Option<PathBuf>,
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Failed,
}

/// Outcome for one audio file of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub filename: String,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchEntry>,
}

impl BatchReport {
    fn record(&mut self, entry: BatchEntry) {
        match entry.status {
            BatchStatus::Success => self.successful += 1,
            BatchStatus::Failed => self.failed += 1,
        }
        self.results.push(entry);
    }
}

/// Build the job `input` map for already-uploaded files.
pub fn build_job_input(
    options: &GenerationOptions,
    media_path: &str,
    audio_path: &str,
    secondary_audio_path: Option<&str>,
) -> Value {
    let mut input = Map::new();
    input.insert("input_type".into(), serde_json::to_value(options.input_type).unwrap_or_default());
    input.insert(
        "person_count".into(),
        serde_json::to_value(options.person_count).unwrap_or_default(),
    );
    input.insert("prompt".into(), options.prompt.clone().into());
    input.insert("width".into(), options.width.into());
    input.insert("height".into(), options.height.into());

    let media_key = match options.input_type {
        MediaKind::Image => "image_path",
        MediaKind::Video => "video_path",
    };
    input.insert(media_key.into(), media_path.into());
    input.insert("wav_path".into(), audio_path.into());

    if options.person_count == ActorCount::Multi {
        if let Some(second) = secondary_audio_path {
            input.insert("wav_path_2".into(), second.into());
        }
    }
    if let Some(frames) = options.max_frame {
        input.insert("max_frame".into(), frames.into());
    }

    Value::Object(input)
}

fn upload_key(prefix: &str, path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{INPUT_KEY_PREFIX}/{prefix}{name}")
}

async fn require_file(path: &Path) -> Result<(), ClientError> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        Ok(())
    } else {
        Err(ClientError::MissingFile(path.to_path_buf()))
    }
}

impl RunpodClient {
    /// Upload a request's files, submit the job and wait for it.
    pub async fn create_video_from_files(
        &self,
        request: &VideoRequest,
        poll: PollSettings,
    ) -> Result<JobOutcome, ClientError> {
        let multi = request.options.person_count == ActorCount::Multi;
        let secondary = request.secondary_audio_path.as_deref().filter(|_| multi);

        require_file(&request.media_path).await?;
        require_file(&request.audio_path).await?;
        if let Some(path) = secondary {
            require_file(path).await?;
        }

        let prefix = format!("{}_", chrono::Utc::now().timestamp());
        let media = self
            .upload(&request.media_path, &upload_key(&prefix, &request.media_path))
            .await?;
        let audio = self
            .upload(&request.audio_path, &upload_key(&prefix, &request.audio_path))
            .await?;
        let secondary = match secondary {
            Some(path) => Some(self.upload(path, &upload_key(&prefix, path)).await?),
            None => None,
        };

        let input = build_job_input(&request.options, &media, &audio, secondary.as_deref());
        let job_id = self.submit_job(&input).await?;
        Ok(self.wait_for_completion(&job_id, poll).await)
    }

    /// Generate one video per audio file in `audio_dir`, all sharing the
    /// media at `media_path`, saving each as `result_<stem>.mp4` under
    /// `output_dir`.
    ///
    /// Per-file failures are recorded in the report and the batch moves on.
    pub async fn batch_process_audio_files(
        &self,
        media_path: &Path,
        audio_dir: &Path,
        output_dir: &Path,
        options: &GenerationOptions,
        poll: PollSettings,
    ) -> Result<BatchReport, ClientError> {
        require_file(media_path).await?;
        if !tokio::fs::metadata(audio_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(ClientError::MissingFile(audio_dir.to_path_buf()));
        }
        tokio::fs::create_dir_all(output_dir).await?;

        let audio_files = list_audio_files(audio_dir).await?;
        if audio_files.is_empty() {
            return Err(ClientError::NoAudioFiles(audio_dir.to_path_buf()));
        }
        tracing::info!(files = audio_files.len(), "Batch processing started");

        let prefix = format!("batch_{}_", chrono::Utc::now().timestamp());
        let media = self
            .upload(media_path, &upload_key(&prefix, media_path))
            .await?;

        let mut report = BatchReport {
            total_files: audio_files.len(),
            ..BatchReport::default()
        };

        for audio_path in &audio_files {
            let filename = audio_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let entry = self
                .process_one(&filename, audio_path, &media, &prefix, output_dir, options, poll)
                .await;
            if let Some(error) = &entry.error {
                tracing::error!(filename = %filename, error = %error, "Batch item failed");
            }
            report.record(entry);
        }

        tracing::info!(
            successful = report.successful,
            total = report.total_files,
            "Batch processing completed",
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_one(
        &self,
        filename: &str,
        audio_path: &Path,
        media: &str,
        prefix: &str,
        output_dir: &Path,
        options: &GenerationOptions,
        poll: PollSettings,
    ) -> BatchEntry {
        let failed = |job_id: Option<String>, error: String| BatchEntry {
            filename: filename.to_string(),
            status: BatchStatus::Failed,
            job_id,
            output_file: None,
            error: Some(error),
        };

        let audio = match self.upload(audio_path, &upload_key(prefix, audio_path)).await {
            Ok(path) => path,
            Err(e) => return failed(None, e.to_string()),
        };

        let input = build_job_input(options, media, &audio, None);
        let job_id = match self.submit_job(&input).await {
            Ok(id) => id,
            Err(e) => return failed(None, e.to_string()),
        };

        let output = match self.wait_for_completion(&job_id, poll).await {
            JobOutcome::Completed { output } => output,
            other => {
                let reason = other
                    .failure_reason()
                    .unwrap_or_else(|| "Unknown error".to_string());
                return failed(Some(job_id), reason);
            }
        };

        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output_file = output_dir.join(format!("result_{stem}.mp4"));
        match save_video_result(&output, &output_file).await {
            Ok(_) => BatchEntry {
                filename: filename.to_string(),
                status: BatchStatus::Success,
                job_id: Some(job_id),
                output_file: Some(output_file),
                error: None,
            },
            Err(e) => failed(Some(job_id), format!("Result save failed: {e}")),
        }
    }
}

/// Audio files directly inside `dir`, sorted by name.
async fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>, ClientError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_audio = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_audio && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
