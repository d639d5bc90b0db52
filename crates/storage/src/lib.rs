//! Object storage for uploaded inputs and delivered videos.
//!
//! [`ObjectStore`] is the seam the worker and the submit client upload
//! through. [`S3ObjectStore`] targets an S3-compatible bucket that is also
//! mounted as the worker's network volume; [`LocalObjectStore`] copies into
//! a directory and is used for local runs and tests.

pub mod error;
pub mod local;
pub mod s3;

use std::path::Path;

use async_trait::async_trait;

pub use error::StorageError;
pub use local::LocalObjectStore;
pub use s3::{S3ObjectStore, S3Settings};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `local_path` under `key` and return the path at which the
    /// worker can read the object back.
    async fn put_object(&self, local_path: &Path, key: &str) -> Result<String, StorageError>;
}

/// Join a mount point or prefix with an object key using a single `/`.
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let key = key.trim_start_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}
