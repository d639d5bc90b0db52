//! The four ComfyUI HTTP routes the driver needs.
//!
//! | Route                  | Use                                        |
//! |------------------------|--------------------------------------------|
//! | `GET /`                | reachability probe                         |
//! | `POST /prompt`         | queue a workflow graph for a session       |
//! | `GET /history/{id}`    | per-node outputs of a finished prompt      |
//! | `GET /view`            | raw bytes of a produced file               |

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

/// Thin [`reqwest`] wrapper around one backend.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    http: reqwest::Client,
    base: String,
}

/// Body of a `POST /prompt` answer.
#[derive(Debug, Deserialize)]
pub struct QueuedPrompt {
    /// Missing when the server rejected the graph with a 200.
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub node_errors: Option<Value>,
}

impl QueuedPrompt {
    /// The prompt id, or a description of why the server did not assign one.
    pub fn into_prompt_id(self) -> Result<String, String> {
        match self.prompt_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(self
                .node_errors
                .filter(|errors| errors.as_object().map_or(true, |m| !m.is_empty()))
                .map(|errors| format!("graph rejected: {errors}"))
                .unwrap_or_else(|| "response carried no prompt_id".to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ComfyUI answered {status}: {body}")]
    Status { status: u16, body: String },
}

impl ComfyUIApi {
    /// `base` is the HTTP origin, e.g. `http://127.0.0.1:8188`.
    pub fn new(base: String) -> Self {
        Self::with_client(reqwest::Client::new(), base)
    }

    pub fn with_client(http: reqwest::Client, base: String) -> Self {
        Self { http, base }
    }

    pub fn api_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base.trim_end_matches('/'))
    }

    /// One `GET /` bounded by `timeout`. Any 2xx means the server is up.
    pub async fn probe(&self, timeout: Duration) -> Result<(), ComfyUIApiError> {
        let response = self.http.get(self.url("/")).timeout(timeout).send().await?;
        expect_success(response).await.map(drop)
    }

    /// Queue `workflow` so its events go to the socket opened with `client_id`.
    pub async fn queue_prompt(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<QueuedPrompt, ComfyUIApiError> {
        let response = self
            .http
            .post(self.url("/prompt"))
            .json(&json!({ "prompt": workflow, "client_id": client_id }))
            .send()
            .await?;
        Ok(expect_success(response).await?.json().await?)
    }

    /// History document for `prompt_id`, keyed by the prompt id itself.
    pub async fn history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let response = self
            .http
            .get(self.url(&format!("/history/{prompt_id}")))
            .send()
            .await?;
        Ok(expect_success(response).await?.json().await?)
    }

    pub async fn view(
        &self,
        filename: &str,
        subfolder: &str,
        folder_type: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .http
            .get(self.url("/view"))
            .query(&[("filename", filename), ("subfolder", subfolder), ("type", folder_type)])
            .send()
            .await?;
        Ok(expect_success(response).await?.bytes().await?.to_vec())
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, ComfyUIApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ComfyUIApiError::Status {
        status: status.as_u16(),
        body,
    })
}
