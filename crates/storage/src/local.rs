//! Directory-backed object store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{join_key, ObjectStore, StorageError};

/// Copies objects under `root` and reports them as `<public_prefix>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_prefix: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.into(),
        }
    }

    /// Where `key` lives on disk.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(local_path.to_path_buf()));
        }

        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(local_path, &target).await?;

        tracing::debug!(key, bytes, target = %target.display(), "Stored object locally");
        Ok(join_key(&self.public_prefix, key))
    }
}
