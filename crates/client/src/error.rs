use std::path::PathBuf;

use talkgen_storage::StorageError;

/// Errors from the serverless submit client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint returned a non-2xx status code.
    #[error("Endpoint API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Submission response carried no job id")]
    MissingJobId,

    #[error("Local file does not exist: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("No audio files to process in {}", .0.display())]
    NoAudioFiles(PathBuf),

    #[error("Upload failed: {0}")]
    Upload(#[from] StorageError),

    #[error("Job output carries no video data")]
    NoVideo,

    #[error("Video payload is not valid base64: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
