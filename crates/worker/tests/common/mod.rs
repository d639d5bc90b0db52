//! In-process mock of the ComfyUI HTTP + WebSocket API, plus helpers to
//! build a worker pointed at it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use talkgen_comfyui::client::BackendAddress;
use talkgen_comfyui::driver::DriverConfig;
use talkgen_comfyui::retry::RetryPolicy;
use talkgen_core::ffmpeg::FfmpegError;
use talkgen_core::frame_budget::DurationProbe;
use talkgen_worker::config::WorkerConfig;
use tokio::sync::broadcast;

/// Bytes the mock reports as the generated video.
pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42-mock-video-payload";
/// Bytes served for URL inputs under `/assets/`.
pub const ASSET_BYTES: &[u8] = b"RIFF-mock-audio";

const CLOSE_MARKER: &str = "__close__";

/// What the mock does once a prompt is submitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Completes and reports the video with a readable `fullpath`.
    VideoAtFullpath,
    /// Completes and reports the video by filename only.
    VideoViaView,
    /// Completes with no video outputs.
    NoOutputs,
    /// Reports an execution error, then completes with no outputs.
    ExecutionError,
    /// Closes the event stream before completing.
    AbortStream,
    /// Answers HTTP but serves no `/ws` route.
    NoEventStream,
    /// Refuses every graph with a 400 and `node_errors`.
    RejectPrompt,
    /// Accepts the graph with a 200 that carries no `prompt_id`.
    NoPromptId,
}

pub struct MockState {
    outcome: Outcome,
    events: broadcast::Sender<String>,
    output_path: PathBuf,
    /// `(client_id, prompt)` of every submission.
    pub submissions: Mutex<Vec<(String, Value)>>,
}

pub struct MockComfy {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    _output_dir: tempfile::TempDir,
}

impl MockComfy {
    pub async fn start(outcome: Outcome) -> Self {
        let output_dir = tempfile::tempdir().unwrap();
        let output_path = output_dir.path().join("infinitetalk_00001.mp4");
        tokio::fs::write(&output_path, VIDEO_BYTES).await.unwrap();

        let (events, _) = broadcast::channel(64);
        let state = Arc::new(MockState {
            outcome,
            events,
            output_path,
            submissions: Mutex::new(Vec::new()),
        });

        let mut app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route("/prompt", post(submit))
            .route("/history/{prompt_id}", get(history))
            .route("/view", get(view))
            .route("/assets/{name}", get(asset));
        if state.outcome != Outcome::NoEventStream {
            app = app.route("/ws", get(ws_handler));
        }
        let app = app.with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _output_dir: output_dir,
        }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn asset_url(&self, name: &str) -> String {
        format!("http://{}/assets/{name}", self.addr)
    }

    pub fn submissions(&self) -> Vec<(String, Value)> {
        self.state.submissions.lock().unwrap().clone()
    }
}

async fn submit(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let client_id = body["client_id"].as_str().unwrap_or_default().to_string();
    let prompt_id = {
        let mut submissions = state.submissions.lock().unwrap();
        submissions.push((client_id, body["prompt"].clone()));
        format!("prompt-{}", submissions.len())
    };

    match state.outcome {
        Outcome::RejectPrompt => {
            let body = json!({
                "error": {"type": "prompt_outputs_failed_validation"},
                "node_errors": {"284": {"errors": [{"message": "Image not found"}]}}
            });
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
        Outcome::NoPromptId => {
            return Json(json!({"number": 0, "node_errors": {}})).into_response();
        }
        _ => {}
    }

    let send = |event: Value| {
        let _ = state.events.send(event.to_string());
    };
    send(json!({"type": "execution_start", "data": {"prompt_id": prompt_id}}));
    send(json!({"type": "executing", "data": {"node": "128", "prompt_id": prompt_id}}));
    send(json!({"type": "progress", "data": {"value": 2, "max": 4, "prompt_id": prompt_id, "node": "128"}}));
    send(json!({"type": "executing", "data": {"node": null, "prompt_id": "someone-else"}}));

    match state.outcome {
        Outcome::AbortStream => {
            let _ = state.events.send(CLOSE_MARKER.to_string());
        }
        Outcome::ExecutionError => {
            send(json!({"type": "execution_error", "data": {
                "prompt_id": prompt_id,
                "node_id": "128",
                "node_type": "WanVideoSampler",
                "exception_message": "Allocation on device",
                "exception_type": "torch.OutOfMemoryError"
            }}));
            send(json!({"type": "executing", "data": {"node": null, "prompt_id": prompt_id}}));
        }
        _ => {
            send(json!({"type": "executing", "data": {"node": null, "prompt_id": prompt_id}}));
        }
    }

    Json(json!({"prompt_id": prompt_id, "number": 0, "node_errors": {}})).into_response()
}

async fn history(
    State(state): State<Arc<MockState>>,
    UrlPath(prompt_id): UrlPath<String>,
) -> Json<Value> {
    let outputs = match state.outcome {
        Outcome::VideoAtFullpath => json!({
            "131": {"gifs": [{
                "filename": "infinitetalk_00001.mp4",
                "subfolder": "",
                "type": "output",
                "format": "video/h264-mp4",
                "fullpath": state.output_path.display().to_string()
            }]}
        }),
        Outcome::VideoViaView => json!({
            "131": {"gifs": [{
                "filename": "infinitetalk_00001.mp4",
                "subfolder": "talk",
                "type": "output",
                "format": "video/h264-mp4"
            }]}
        }),
        _ => json!({"50": {"images": []}}),
    };
    Json(json!({ prompt_id: {"outputs": outputs} }))
}

#[derive(serde::Deserialize)]
struct ViewQuery {
    filename: String,
    subfolder: String,
    #[serde(rename = "type")]
    folder_type: String,
}

async fn view(Query(query): Query<ViewQuery>) -> Response {
    if query.filename == "infinitetalk_00001.mp4"
        && query.subfolder == "talk"
        && query.folder_type == "output"
    {
        VIDEO_BYTES.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn asset(UrlPath(name): UrlPath<String>) -> Response {
    match name.as_str() {
        "empty.wav" => Vec::<u8>::new().into_response(),
        "missing.wav" => StatusCode::NOT_FOUND.into_response(),
        _ => ASSET_BYTES.into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> Response {
    // Subscribe before the upgrade so no event sent after the handshake is lost.
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    let status = json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 0}}, "sid": "mock"}});
    if socket.send(Message::Text(status.to_string().into())).await.is_err() {
        return;
    }

    while let Ok(event) = rx.recv().await {
        if event == CLOSE_MARKER {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        if socket.send(Message::Text(event.into())).await.is_err() {
            return;
        }
    }
}

/// Duration probe that reports the same length for every track.
pub struct FixedDuration(pub f64);

#[async_trait]
impl DurationProbe for FixedDuration {
    async fn duration_secs(&self, _path: &Path) -> Result<f64, FfmpegError> {
        Ok(self.0)
    }
}

/// Directories a test worker reads from and writes to.
pub struct TestDirs {
    pub root: tempfile::TempDir,
}

impl TestDirs {
    pub async fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let samples = root.path().join("samples");
        tokio::fs::create_dir_all(&samples).await.unwrap();
        tokio::fs::write(samples.join("image.jpg"), b"sample-jpg").await.unwrap();
        tokio::fs::write(samples.join("video.mp4"), b"sample-mp4").await.unwrap();
        tokio::fs::write(samples.join("audio.mp3"), b"sample-mp3").await.unwrap();
        tokio::fs::create_dir_all(root.path().join("scratch")).await.unwrap();
        Self { root }
    }

    pub fn samples(&self) -> PathBuf {
        self.root.path().join("samples")
    }

    pub fn scratch(&self) -> PathBuf {
        self.root.path().join("scratch")
    }

    pub fn shared_volume(&self) -> PathBuf {
        self.root.path().join("volume")
    }

    /// Write a caller-supplied input file and return its path as a string.
    pub async fn input_file(&self, name: &str, bytes: &[u8]) -> String {
        let path = self.root.path().join(name);
        tokio::fs::write(&path, bytes).await.unwrap();
        path.display().to_string()
    }

    /// Number of entries left under the scratch root.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch()).unwrap().count()
    }
}

/// Workflow templates shipped with the repository.
pub fn workflow_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../workflows")
}

/// Worker configuration aimed at `host` with short retry bounds.
pub fn test_config(host: &str, dirs: &TestDirs) -> WorkerConfig {
    WorkerConfig {
        backend: BackendAddress::new(host, false),
        workflow_dir: workflow_dir(),
        sample_asset_dir: dirs.samples(),
        scratch_root: dirs.scratch(),
        shared_volume_dir: dirs.shared_volume(),
        driver: DriverConfig {
            probe: RetryPolicy::fixed(3, Duration::from_millis(10), Duration::from_secs(2)),
            connect: RetryPolicy::fixed(3, Duration::from_millis(10), Duration::from_secs(2)),
        },
        download_connect_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(10),
        s3: None,
    }
}
