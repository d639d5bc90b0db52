//! Handing the produced video back to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use base64::Engine as _;
use talkgen_core::types::{DeliveryMode, ResultFields};
use talkgen_storage::{ObjectStore, StorageError};

/// Key prefix for delivered videos in object storage.
const OUTPUT_KEY_PREFIX: &str = "output/infinitetalk";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Cannot read output file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot copy output to {}: {source}", .target.display())]
    Copy {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object storage delivery requested but no object store is configured")]
    StorageNotConfigured,

    #[error("Upload of output failed: {0}")]
    Upload(#[from] StorageError),
}

/// Applies the request's delivery mode to a local artifact.
#[derive(Clone)]
pub struct OutputDelivery {
    shared_volume_dir: PathBuf,
    store: Option<Arc<dyn ObjectStore>>,
}

impl OutputDelivery {
    pub fn new(shared_volume_dir: impl Into<PathBuf>, store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            shared_volume_dir: shared_volume_dir.into(),
            store,
        }
    }

    pub async fn deliver(
        &self,
        mode: DeliveryMode,
        artifact: &Path,
        extension: &str,
    ) -> Result<ResultFields, DeliveryError> {
        match mode {
            DeliveryMode::Inline => {
                let bytes = tokio::fs::read(artifact)
                    .await
                    .map_err(|source| DeliveryError::Read {
                        path: artifact.to_path_buf(),
                        source,
                    })?;
                tracing::info!(bytes = bytes.len(), "Delivering output inline");
                Ok(ResultFields::Video {
                    video: base64::engine::general_purpose::STANDARD.encode(bytes),
                })
            }
            DeliveryMode::SharedVolume => {
                let target = self.copy_to_shared_volume(artifact, extension).await?;
                Ok(ResultFields::VideoPath {
                    video_path: target.display().to_string(),
                })
            }
            DeliveryMode::ObjectStorage => {
                let store = self.store.as_ref().ok_or(DeliveryError::StorageNotConfigured)?;
                let key = format!("{OUTPUT_KEY_PREFIX}/{}.{extension}", uuid::Uuid::new_v4());
                let video_path = store.put_object(artifact, &key).await?;
                tracing::info!(key = %key, video_path = %video_path, "Output uploaded");
                Ok(ResultFields::VideoPath { video_path })
            }
        }
    }

    async fn copy_to_shared_volume(
        &self,
        artifact: &Path,
        extension: &str,
    ) -> Result<PathBuf, DeliveryError> {
        let source_meta = tokio::fs::metadata(artifact)
            .await
            .map_err(|source| DeliveryError::Read {
                path: artifact.to_path_buf(),
                source,
            })?;

        let target = self
            .shared_volume_dir
            .join(format!("infinitetalk_{}.{extension}", uuid::Uuid::new_v4()));
        let copy_error = |source| DeliveryError::Copy {
            target: target.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.shared_volume_dir)
            .await
            .map_err(copy_error)?;
        let copied = tokio::fs::copy(artifact, &target).await.map_err(copy_error)?;

        if let Ok(modified) = source_meta.modified() {
            if let Err(e) = preserve_mtime(&target, modified).await {
                tracing::warn!(target = %target.display(), error = %e, "Could not preserve modification time");
            }
        }

        if copied != source_meta.len() {
            tracing::error!(
                expected = source_meta.len(),
                copied,
                target = %target.display(),
                "Shared-volume copy size mismatch",
            );
        } else {
            tracing::info!(bytes = copied, target = %target.display(), "Output copied to shared volume");
        }

        Ok(target)
    }
}

async fn preserve_mtime(target: &Path, modified: SystemTime) -> std::io::Result<()> {
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(target)?
            .set_modified(modified)
    })
    .await
    .map_err(std::io::Error::other)?
}
