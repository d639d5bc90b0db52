use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Local file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload of {key} failed: {message}")]
    Upload { key: String, message: String },
}
