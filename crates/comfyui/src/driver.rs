//! One-shot execution of a workflow graph on a ComfyUI instance.
//!
//! [`ExecutionDriver::execute`] runs the full remote lifecycle for one job:
//! probe the HTTP endpoint, open a session stream under a fresh client id,
//! submit the graph, wait for the terminal signal, and read the produced
//! artifacts from the history endpoint.

use std::fmt;

use serde_json::Value;
use tracing::Instrument;

use crate::api::ComfyUIApi;
use crate::client::{BackendAddress, ComfyUIClient, ComfyUIConnection};
use crate::history::{extract_artifacts, ArtifactReference};
use crate::monitor::{wait_for_completion, MonitorError};
use crate::retry::{retry_bounded, RetryPolicy};

/// Retry bounds for the two connection phases.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub probe: RetryPolicy,
    pub connect: RetryPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            probe: RetryPolicy::http_probe(),
            connect: RetryPolicy::stream_connect(),
        }
    }
}

/// Lifecycle phases of one execution, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Probing,
    Connecting,
    Submitting,
    Monitoring,
    Collecting,
    Done,
    Failed,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Probing => "probing",
            Self::Connecting => "connecting",
            Self::Submitting => "submitting",
            Self::Monitoring => "monitoring",
            Self::Collecting => "collecting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Identifies one submission on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionHandle {
    pub client_id: String,
    pub prompt_id: String,
}

/// Result of a completed execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub handle: ExecutionHandle,
    /// Non-empty, in the order the backend reported them.
    pub artifacts: Vec<ArtifactReference>,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("ComfyUI at {url} unreachable after {attempts} attempts: {last_error}")]
    BackendUnreachable {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Could not open event stream to {url} after {attempts} attempts: {last_error}")]
    StreamConnect {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Workflow submission rejected: {0}")]
    Submission(String),

    #[error("Event stream for prompt {prompt_id} ended early: {reason}")]
    StreamAborted { prompt_id: String, reason: String },

    #[error("Prompt {prompt_id} finished without producing a video")]
    NoArtifact {
        prompt_id: String,
        /// Execution error the backend reported for this prompt, if any.
        execution_error: Option<String>,
    },

    #[error("Could not read history for prompt {prompt_id}: {reason}")]
    History { prompt_id: String, reason: String },
}

/// Executes workflow graphs against one backend address.
#[derive(Debug, Clone)]
pub struct ExecutionDriver {
    api: ComfyUIApi,
    client: ComfyUIClient,
    config: DriverConfig,
}

impl ExecutionDriver {
    pub fn new(address: &BackendAddress, config: DriverConfig) -> Self {
        Self {
            api: ComfyUIApi::new(address.api_url()),
            client: ComfyUIClient::new(address.ws_url()),
            config,
        }
    }

    /// Like [`ExecutionDriver::new`] but sharing an existing HTTP client.
    pub fn with_client(
        http: reqwest::Client,
        address: &BackendAddress,
        config: DriverConfig,
    ) -> Self {
        Self {
            api: ComfyUIApi::with_client(http, address.api_url()),
            client: ComfyUIClient::new(address.ws_url()),
            config,
        }
    }

    /// The REST client, for follow-up downloads through `/view`.
    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Run `workflow` to completion and return its artifacts.
    ///
    /// Each call uses its own client id so concurrent executions never
    /// see each other's events.
    pub async fn execute(&self, workflow: &Value) -> Result<ExecutionOutput, DriverError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let result = self
            .run(workflow, &client_id)
            .instrument(tracing::info_span!("execute", client_id = %client_id))
            .await;
        if let Err(ref e) = result {
            transition(&client_id, DriverState::Failed);
            tracing::error!(client_id = %client_id, error = %e, "Execution failed");
        }
        result
    }

    async fn run(&self, workflow: &Value, client_id: &str) -> Result<ExecutionOutput, DriverError> {
        transition(client_id, DriverState::Probing);
        self.wait_until_reachable().await?;

        transition(client_id, DriverState::Connecting);
        let mut connection = self.open_stream(client_id).await?;

        transition(client_id, DriverState::Submitting);
        let prompt_id = match self.submit(workflow, client_id).await {
            Ok(id) => id,
            Err(e) => {
                close_stream(&mut connection).await;
                return Err(e);
            }
        };

        transition(client_id, DriverState::Monitoring);
        let completion = wait_for_completion(&mut connection.ws_stream, &prompt_id).await;
        close_stream(&mut connection).await;
        let completion = completion.map_err(|e| DriverError::StreamAborted {
            prompt_id: prompt_id.clone(),
            reason: match e {
                MonitorError::Closed { .. } => "stream closed".to_string(),
                MonitorError::Receive(reason) => reason,
            },
        })?;

        transition(client_id, DriverState::Collecting);
        let history = self
            .api
            .history(&prompt_id)
            .await
            .map_err(|e| DriverError::History {
                prompt_id: prompt_id.clone(),
                reason: e.to_string(),
            })?;

        let artifacts = extract_artifacts(&history, &prompt_id);
        if artifacts.is_empty() {
            return Err(DriverError::NoArtifact {
                prompt_id,
                execution_error: completion.execution_error,
            });
        }

        transition(client_id, DriverState::Done);
        tracing::info!(
            client_id,
            prompt_id = %prompt_id,
            artifacts = artifacts.len(),
            cached_nodes = completion.cached_nodes,
            "Execution produced artifacts",
        );

        Ok(ExecutionOutput {
            handle: ExecutionHandle {
                client_id: client_id.to_string(),
                prompt_id,
            },
            artifacts,
        })
    }

    async fn wait_until_reachable(&self) -> Result<(), DriverError> {
        let policy = &self.config.probe;
        retry_bounded(policy, "http_probe", |_| self.api.probe(policy.attempt_timeout))
            .await
            .map_err(|exhausted| DriverError::BackendUnreachable {
                url: self.api.api_url().to_string(),
                attempts: exhausted.attempts,
                last_error: exhausted.last_error.to_string(),
            })
    }

    async fn open_stream(&self, client_id: &str) -> Result<ComfyUIConnection, DriverError> {
        let policy = &self.config.connect;
        retry_bounded(policy, "stream_connect", |_| {
            self.client.connect(client_id, policy.attempt_timeout)
        })
        .await
        .map_err(|exhausted| DriverError::StreamConnect {
            url: self.client.ws_url().to_string(),
            attempts: exhausted.attempts,
            last_error: exhausted.last_error.to_string(),
        })
    }

    async fn submit(&self, workflow: &Value, client_id: &str) -> Result<String, DriverError> {
        let queued = self
            .api
            .queue_prompt(workflow, client_id)
            .await
            .map_err(|e| DriverError::Submission(e.to_string()))?;
        let position = queued.number;
        let prompt_id = queued.into_prompt_id().map_err(DriverError::Submission)?;

        tracing::info!(
            client_id,
            prompt_id = %prompt_id,
            queue_position = position,
            "Workflow submitted to ComfyUI",
        );
        Ok(prompt_id)
    }
}

fn transition(client_id: &str, state: DriverState) {
    tracing::debug!(client_id, state = %state, "Driver state");
}

async fn close_stream(connection: &mut ComfyUIConnection) {
    if let Err(e) = connection.ws_stream.close(None).await {
        tracing::debug!(client_id = %connection.client_id, error = %e, "Stream close failed");
    }
}
