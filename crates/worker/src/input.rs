//! Turning input descriptors into local files.
//!
//! Every descriptor variant ends up as a readable, non-empty file path:
//! caller paths are checked in place, URLs are downloaded and inline
//! payloads decoded into the request's scratch directory, and absent
//! inputs fall back to the bundled sample assets.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use talkgen_core::types::{InputDescriptor, InputKind};
use tokio::io::AsyncWriteExt;

use crate::config::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} input not found: {}", .path.display())]
    NotFound { kind: &'static str, path: PathBuf },

    #[error("{kind} input is empty: {}", .path.display())]
    Empty { kind: &'static str, path: PathBuf },

    #[error("Failed to download {kind} input from {url}: {reason}")]
    Download {
        kind: &'static str,
        url: String,
        reason: String,
    },

    #[error("Failed to decode inline {kind} input: {reason}")]
    Decode { kind: &'static str, reason: String },

    #[error("I/O error while preparing {kind} input: {source}")]
    Io {
        kind: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves descriptors for one worker process.
#[derive(Debug, Clone)]
pub struct InputResolver {
    http: reqwest::Client,
    sample_dir: PathBuf,
}

impl InputResolver {
    pub fn new(config: &WorkerConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.download_connect_timeout)
            .timeout(config.download_timeout)
            .build()?;

        Ok(Self {
            http,
            sample_dir: config.sample_asset_dir.clone(),
        })
    }

    /// Produce a local file for `descriptor`, writing into `work_dir` when
    /// bytes have to be materialised.
    pub async fn resolve(
        &self,
        descriptor: &InputDescriptor,
        kind: InputKind,
        work_dir: &Path,
    ) -> Result<PathBuf, InputError> {
        let path = match descriptor {
            InputDescriptor::Path(path) => PathBuf::from(path),
            InputDescriptor::Url(url) => self.download(url, kind, work_dir).await?,
            InputDescriptor::Inline(payload) => decode_inline(payload, kind, work_dir).await?,
            InputDescriptor::Default => self.sample_dir.join(kind.sample_file_name()),
        };

        ensure_readable(&path, kind).await?;

        tracing::info!(
            kind = kind.as_str(),
            source = descriptor.variant_name(),
            path = %path.display(),
            "Input resolved",
        );
        Ok(path)
    }

    async fn download(
        &self,
        url: &str,
        kind: InputKind,
        work_dir: &Path,
    ) -> Result<PathBuf, InputError> {
        let download_error = |reason: String| InputError::Download {
            kind: kind.as_str(),
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_error(e.to_string()))?;

        let ext = url_extension(url).unwrap_or_else(|| kind.default_extension().to_string());
        let target = scratch_file(work_dir, kind, &ext).await?;
        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|source| io_error(kind, source))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_error(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|source| io_error(kind, source))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|source| io_error(kind, source))?;

        tracing::debug!(kind = kind.as_str(), url, bytes = written, "Downloaded input");
        Ok(target)
    }
}

async fn decode_inline(payload: &str, kind: InputKind, work_dir: &Path) -> Result<PathBuf, InputError> {
    let bytes = decode_base64(payload).map_err(|reason| InputError::Decode {
        kind: kind.as_str(),
        reason,
    })?;

    let target = scratch_file(work_dir, kind, kind.default_extension()).await?;
    tokio::fs::write(&target, &bytes)
        .await
        .map_err(|source| io_error(kind, source))?;

    tracing::debug!(kind = kind.as_str(), bytes = bytes.len(), "Decoded inline input");
    Ok(target)
}

/// Decode standard base64, tolerating a `data:<mime>;base64,` prefix and
/// embedded whitespace.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, String> {
    let body = match payload.trim_start().strip_prefix("data:") {
        Some(rest) => match rest.split_once(";base64,") {
            Some((_, data)) => data,
            None => return Err("data URI is not base64-encoded".to_string()),
        },
        None => payload,
    };

    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| e.to_string())
}

/// Extension of the last path segment of `url`, if it looks like one.
fn url_extension(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

async fn scratch_file(work_dir: &Path, kind: InputKind, ext: &str) -> Result<PathBuf, InputError> {
    tokio::fs::create_dir_all(work_dir)
        .await
        .map_err(|source| io_error(kind, source))?;
    Ok(work_dir.join(format!("{}_{}.{ext}", kind.as_str(), uuid::Uuid::new_v4())))
}

async fn ensure_readable(path: &Path, kind: InputKind) -> Result<(), InputError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(meta) if meta.is_file() => Err(InputError::Empty {
            kind: kind.as_str(),
            path: path.to_path_buf(),
        }),
        _ => Err(InputError::NotFound {
            kind: kind.as_str(),
            path: path.to_path_buf(),
        }),
    }
}

fn io_error(kind: InputKind, source: std::io::Error) -> InputError {
    InputError::Io {
        kind: kind.as_str(),
        source,
    }
}
