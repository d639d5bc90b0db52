//! REST client for the serverless job API.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde_json::{json, Value};
use talkgen_storage::ObjectStore;
use tokio::time::Instant;

use crate::error::ClientError;

/// Public base URL of the serverless API.
pub const DEFAULT_API_BASE: &str = "https://api.runpod.ai/v2";

/// Endpoint coordinates and credentials.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// e.g. `https://api.runpod.ai/v2`.
    pub api_base: String,
    pub endpoint_id: String,
    pub api_key: String,
    /// Per-request timeout for `/run` and `/status`.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            endpoint_id: endpoint_id.into(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn endpoint_url(&self) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), self.endpoint_id)
    }
}

/// How often and how long to poll a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(1800),
        }
    }
}

/// Terminal state of a polled job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { output: Value },
    Failed { error: String },
    /// The endpoint reported a status this client does not know.
    Unknown { data: Value },
    TimedOut { waited: Duration },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Human-readable failure reason, `None` for completed jobs.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { error } => Some(error.clone()),
            Self::Unknown { data } => Some(format!(
                "unknown job status {}",
                data.get("status").unwrap_or(&Value::Null)
            )),
            Self::TimedOut { waited } => Some(format!("job wait timed out after {waited:?}")),
        }
    }
}

/// Submits jobs to one serverless endpoint.
#[derive(Clone)]
pub struct RunpodClient {
    http: reqwest::Client,
    config: ClientConfig,
    store: Arc<dyn ObjectStore>,
}

impl RunpodClient {
    pub fn new(config: ClientConfig, store: Arc<dyn ObjectStore>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            store,
        })
    }

    /// Queue a job and return its id.
    ///
    /// Sends `POST {base}/{endpoint}/run` with `{"input": input}`.
    pub async fn submit_job(&self, input: &Value) -> Result<String, ClientError> {
        let response = self
            .http
            .post(format!("{}/run", self.config.endpoint_url()))
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "input": input }))
            .send()
            .await?;

        let body: Value = Self::parse_response(response).await?;
        let job_id = body
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(ClientError::MissingJobId)?
            .to_string();

        tracing::info!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    /// Raw status document of a job (`GET {base}/{endpoint}/status/{id}`).
    pub async fn job_status(&self, job_id: &str) -> Result<Value, ClientError> {
        let response = self
            .http
            .get(format!("{}/status/{job_id}", self.config.endpoint_url()))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Poll a job until it reaches a terminal state or `poll.max_wait`
    /// elapses. Transport errors are logged and polling continues.
    pub async fn wait_for_completion(&self, job_id: &str, poll: PollSettings) -> JobOutcome {
        let started = Instant::now();

        loop {
            let waited = started.elapsed();
            if waited >= poll.max_wait {
                tracing::error!(job_id, waited_secs = waited.as_secs(), "Job wait timed out");
                return JobOutcome::TimedOut { waited };
            }

            match self.job_status(job_id).await {
                Ok(data) => {
                    let status = data.get("status").and_then(Value::as_str).unwrap_or_default();
                    match status {
                        "COMPLETED" => {
                            tracing::info!(job_id, "Job completed");
                            return JobOutcome::Completed {
                                output: data.get("output").cloned().unwrap_or(Value::Null),
                            };
                        }
                        "FAILED" => {
                            let error = match data.get("error") {
                                Some(Value::String(s)) => s.clone(),
                                Some(other) => other.to_string(),
                                None => "Unknown error".to_string(),
                            };
                            tracing::error!(job_id, error = %error, "Job failed");
                            return JobOutcome::Failed { error };
                        }
                        "IN_QUEUE" | "IN_PROGRESS" => {
                            tracing::debug!(job_id, status, "Job in progress");
                        }
                        other => {
                            tracing::warn!(job_id, status = other, "Unknown job status");
                            return JobOutcome::Unknown { data };
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "Error checking job status");
                }
            }

            tokio::time::sleep(poll.interval).await;
        }
    }

    /// Upload a local file under `key` and return the worker-side path.
    pub async fn upload(&self, local_path: &Path, key: &str) -> Result<String, ClientError> {
        tracing::info!(path = %local_path.display(), key, "Uploading input");
        Ok(self.store.put_object(local_path, key).await?)
    }

    // ---- private helpers ----

    async fn parse_response(response: reqwest::Response) -> Result<Value, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

/// Decode the video from a completed job's output and write it to
/// `output_path`, creating parent directories. Returns bytes written.
///
/// Reads `video`, falling back to the older `video_base64` key.
pub async fn save_video_result(output: &Value, output_path: &Path) -> Result<u64, ClientError> {
    let encoded = ["video", "video_base64"]
        .iter()
        .find_map(|key| output.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .ok_or(ClientError::NoVideo)?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ClientError::Decode(e.to_string()))?;

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(output_path, &bytes).await?;

    tracing::info!(
        path = %output_path.display(),
        size_mb = bytes.len() as f64 / (1024.0 * 1024.0),
        "Video saved",
    );
    Ok(bytes.len() as u64)
}
