//! In-process mock of the serverless `/run` + `/status` API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub const ENDPOINT_ID: &str = "talk-endpoint";
pub const API_KEY: &str = "test-key";
pub const VIDEO_B64: &str = "bW9jay12aWRlbw=="; // "mock-video"

/// How a submitted job resolves. Chosen per job from its `wav_path`.
fn outcome_for(input: &Value) -> &'static str {
    let audio = input["wav_path"].as_str().unwrap_or_default();
    if audio.contains("fail") {
        "FAILED"
    } else if audio.contains("odd") {
        "CANCELLED"
    } else if audio.contains("slow") {
        "IN_PROGRESS"
    } else {
        "COMPLETED"
    }
}

#[derive(Default)]
pub struct MockState {
    /// Submitted inputs in order.
    pub inputs: Mutex<Vec<Value>>,
    polls: Mutex<HashMap<String, u32>>,
    /// When set, `/run` answers without an id.
    pub omit_job_id: bool,
}

impl MockState {
    /// State whose `/run` answers carry no job id.
    pub fn without_job_id() -> Self {
        Self {
            omit_job_id: true,
            ..Self::default()
        }
    }
}

pub struct MockRunpod {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockRunpod {
    pub async fn start() -> Self {
        Self::start_with(MockState::default()).await
    }

    pub async fn start_with(state: MockState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/v2/{endpoint}/run", post(run))
            .route("/v2/{endpoint}/status/{job_id}", get(status))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn api_base(&self) -> String {
        format!("http://{}/v2", self.addr)
    }

    pub fn inputs(&self) -> Vec<Value> {
        self.state.inputs.lock().unwrap().clone()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {API_KEY}"))
        .unwrap_or(false)
}

async fn run(
    State(state): State<Arc<MockState>>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) || endpoint != ENDPOINT_ID {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut inputs = state.inputs.lock().unwrap();
    inputs.push(body["input"].clone());
    let job_id = format!("job-{}", inputs.len());

    if state.omit_job_id {
        Json(json!({"status": "IN_QUEUE"})).into_response()
    } else {
        Json(json!({"id": job_id, "status": "IN_QUEUE"})).into_response()
    }
}

async fn status(
    State(state): State<Arc<MockState>>,
    Path((_endpoint, job_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let index: usize = job_id
        .trim_start_matches("job-")
        .parse()
        .unwrap_or(0);
    let Some(input) = state.inputs.lock().unwrap().get(index.wrapping_sub(1)).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let polls = {
        let mut polls = state.polls.lock().unwrap();
        let count = polls.entry(job_id.clone()).or_insert(0);
        *count += 1;
        *count
    };

    // Every job is queued on its first poll.
    if polls == 1 {
        return Json(json!({"id": job_id, "status": "IN_QUEUE"})).into_response();
    }

    let body = match outcome_for(&input) {
        "COMPLETED" => json!({"id": job_id, "status": "COMPLETED", "output": {"video": VIDEO_B64}}),
        "FAILED" => json!({"id": job_id, "status": "FAILED", "error": "handler raised"}),
        other => json!({"id": job_id, "status": other}),
    };
    Json(body).into_response()
}
