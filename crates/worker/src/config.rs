use std::path::PathBuf;
use std::time::Duration;

use talkgen_comfyui::client::BackendAddress;
use talkgen_comfyui::driver::DriverConfig;
use talkgen_comfyui::retry::RetryPolicy;
use talkgen_core::error::CoreError;
use talkgen_storage::s3::DEFAULT_VOLUME_MOUNT;
use talkgen_storage::S3Settings;

/// Per-attempt timeout of the HTTP reachability probe.
const PROBE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-attempt timeout of the WebSocket handshake.
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Worker configuration loaded from environment variables.
///
/// Every field has a default matching the production container layout.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// ComfyUI host and scheme family.
    pub backend: BackendAddress,
    /// Directory holding the workflow template files.
    pub workflow_dir: PathBuf,
    /// Directory holding the built-in sample assets.
    pub sample_asset_dir: PathBuf,
    /// Parent of the per-request scratch directories.
    pub scratch_root: PathBuf,
    /// Target directory for shared-volume delivery.
    pub shared_volume_dir: PathBuf,
    /// Retry bounds for the backend probe and stream connection.
    pub driver: DriverConfig,
    /// Connect timeout for URL inputs.
    pub download_connect_timeout: Duration,
    /// Overall timeout for URL inputs.
    pub download_timeout: Duration,
    /// Object storage, enabled when both bucket and endpoint are set.
    pub s3: Option<S3Settings>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                         | Default            |
    /// |---------------------------------|--------------------|
    /// | `COMFYUI_HOST`                  | `127.0.0.1:8188`   |
    /// | `COMFYUI_SECURE`                | `false`            |
    /// | `WORKFLOW_DIR`                  | `/`                |
    /// | `SAMPLE_ASSET_DIR`              | `/examples`        |
    /// | `SCRATCH_ROOT`                  | system temp dir    |
    /// | `SHARED_VOLUME_DIR`             | `/runpod-volume`   |
    /// | `HTTP_PROBE_ATTEMPTS`           | `180`              |
    /// | `HTTP_PROBE_DELAY_MS`           | `1000`             |
    /// | `STREAM_CONNECT_ATTEMPTS`       | `36`               |
    /// | `STREAM_CONNECT_DELAY_MS`       | `5000`             |
    /// | `DOWNLOAD_CONNECT_TIMEOUT_SECS` | `30`               |
    /// | `DOWNLOAD_TIMEOUT_SECS`         | `60`               |
    /// | `S3_ENDPOINT_URL`, `S3_BUCKET`  | unset (disabled)   |
    /// | `S3_REGION`                     | `us-east-1`        |
    /// | `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY` | empty   |
    /// | `S3_VOLUME_MOUNT`               | `/runpod-volume`   |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("COMFYUI_HOST").unwrap_or_else(|| "127.0.0.1:8188".into());
        let secure = parse_bool(&var, "COMFYUI_SECURE", false)?;

        let probe_attempts: u32 = parse_number(&var, "HTTP_PROBE_ATTEMPTS", 180)?;
        let probe_delay_ms: u64 = parse_number(&var, "HTTP_PROBE_DELAY_MS", 1000)?;
        let connect_attempts: u32 = parse_number(&var, "STREAM_CONNECT_ATTEMPTS", 36)?;
        let connect_delay_ms: u64 = parse_number(&var, "STREAM_CONNECT_DELAY_MS", 5000)?;
        let download_connect_secs: u64 = parse_number(&var, "DOWNLOAD_CONNECT_TIMEOUT_SECS", 30)?;
        let download_secs: u64 = parse_number(&var, "DOWNLOAD_TIMEOUT_SECS", 60)?;

        let s3 = match (var("S3_ENDPOINT_URL"), var("S3_BUCKET")) {
            (Some(endpoint_url), Some(bucket)) => Some(S3Settings {
                endpoint_url,
                bucket,
                region: var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                access_key_id: var("S3_ACCESS_KEY_ID").unwrap_or_default(),
                secret_access_key: var("S3_SECRET_ACCESS_KEY").unwrap_or_default(),
                volume_mount: var("S3_VOLUME_MOUNT")
                    .unwrap_or_else(|| DEFAULT_VOLUME_MOUNT.into()),
            }),
            _ => None,
        };

        Ok(Self {
            backend: BackendAddress::new(host, secure),
            workflow_dir: var("WORKFLOW_DIR").unwrap_or_else(|| "/".into()).into(),
            sample_asset_dir: var("SAMPLE_ASSET_DIR")
                .unwrap_or_else(|| "/examples".into())
                .into(),
            scratch_root: var("SCRATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            shared_volume_dir: var("SHARED_VOLUME_DIR")
                .unwrap_or_else(|| DEFAULT_VOLUME_MOUNT.into())
                .into(),
            driver: DriverConfig {
                probe: RetryPolicy::fixed(
                    probe_attempts,
                    Duration::from_millis(probe_delay_ms),
                    PROBE_ATTEMPT_TIMEOUT,
                ),
                connect: RetryPolicy::fixed(
                    connect_attempts,
                    Duration::from_millis(connect_delay_ms),
                    CONNECT_ATTEMPT_TIMEOUT,
                ),
            },
            download_connect_timeout: Duration::from_secs(download_connect_secs),
            download_timeout: Duration::from_secs(download_secs),
            s3,
        })
    }
}

fn parse_bool<F>(var: &F, key: &str, default: bool) -> Result<bool, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::Configuration(format!(
            "{key} must be a boolean (true/false), got {raw:?}"
        ))),
    }
}

fn parse_number<T, F>(var: &F, key: &str, default: T) -> Result<T, CoreError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            CoreError::Configuration(format!("{key} must be a non-negative integer, got {raw:?}"))
        }),
    }
}
