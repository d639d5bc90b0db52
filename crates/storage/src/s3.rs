//! S3-compatible object store.
//!
//! The bucket doubles as the worker's network volume, so an uploaded
//! object is addressed by the worker as `<volume_mount>/<key>` rather than
//! by URL.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

use crate::{join_key, ObjectStore, StorageError};

/// Default mount point of the network volume inside the worker.
pub const DEFAULT_VOLUME_MOUNT: &str = "/runpod-volume";

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint_url: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub volume_mount: String,
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    volume_mount: String,
}

impl S3ObjectStore {
    /// Build a client with static credentials and path-style addressing.
    pub async fn connect(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "talkgen-static",
        );

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(&settings.endpoint_url)
            .credentials_provider(credentials)
            .load()
            .await;

        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        tracing::info!(
            endpoint = %settings.endpoint_url,
            bucket = %settings.bucket,
            "S3 object store configured",
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: settings.bucket.clone(),
            volume_mount: settings.volume_mount.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(local_path.to_path_buf()));
        }

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::info!(bucket = %self.bucket, key, "Uploaded object");
        Ok(join_key(&self.volume_mount, key))
    }
}
